use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use huddle_core::config::Config;
use huddle_core::core_notify::{DeliveryReport, RoomBroadcaster, TracingMailer};
use huddle_core::core_space::storage::IdentityStore;
use huddle_core::core_space::{
    ChannelId, ChannelKind, NotificationId, NotificationPreference, Permission, PermissionSet, Role, User,
    WorkspaceId, WorkspaceVisibility,
};
use huddle_core::logging::{init_logging_with_config, LogConfig, LogLevel};
use huddle_core::shutdown::{run_until_shutdown, ShutdownCoordinator};
use huddle_core::{metrics, open_store, Huddle};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "huddle")]
#[command(author, version, about = "Operate a Huddle workspace database", long_about = None)]
struct Args {
    /// TOML config file; `HUDDLE_*` variables are used when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Database file, overriding the config
    #[arg(long)]
    db: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error), overriding the config
    #[arg(short, long)]
    log_level: Option<String>,

    /// Enable JSON formatted logging
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Manage user accounts
    #[command(subcommand)]
    User(UserCommand),

    /// Manage workspaces
    #[command(subcommand)]
    Workspace(WorkspaceCommand),

    /// Manage channels
    #[command(subcommand)]
    Channel(ChannelCommand),

    /// Post a message and wait for its notifications to go out
    Post {
        /// Sender handle
        #[arg(long = "as")]
        user: String,
        #[arg(long)]
        channel: String,
        text: String,
    },

    /// Recent messages of a channel
    History {
        #[arg(long = "as")]
        user: String,
        #[arg(long)]
        channel: String,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Show a user's effective role and permissions
    Resolve {
        /// User handle
        user: String,
        #[arg(long)]
        workspace: String,
        #[arg(long)]
        channel: Option<String>,
    },

    /// List a user's notifications
    Notifications {
        #[arg(long = "as")]
        user: String,
        #[arg(long)]
        unread: bool,
    },

    /// Mark a notification read
    Read {
        #[arg(long = "as")]
        user: String,
        id: String,
    },

    /// Write the effective configuration to a file
    InitConfig { path: PathBuf },
}

#[derive(Subcommand, Debug)]
enum UserCommand {
    Add {
        /// Display name, also the mention handle
        name: String,
        #[arg(long)]
        email: String,
        /// Platform-wide administrator
        #[arg(long)]
        global_admin: bool,
    },
}

#[derive(Subcommand, Debug)]
enum WorkspaceCommand {
    Create {
        #[arg(long = "as")]
        user: String,
        name: String,
        #[arg(long)]
        private: bool,
    },
    Delete {
        #[arg(long = "as")]
        user: String,
        workspace: String,
    },
    Invite {
        #[arg(long = "as")]
        user: String,
        #[arg(long)]
        workspace: String,
        email: String,
    },
    /// Join with a workspace code
    Join {
        #[arg(long = "as")]
        user: String,
        code: String,
    },
    Leave {
        #[arg(long = "as")]
        user: String,
        workspace: String,
    },
    Request {
        #[arg(long = "as")]
        user: String,
        workspace: String,
    },
    Approve {
        #[arg(long = "as")]
        user: String,
        #[arg(long)]
        workspace: String,
        requester: String,
    },
    Reject {
        #[arg(long = "as")]
        user: String,
        #[arg(long)]
        workspace: String,
        requester: String,
    },
    Remove {
        #[arg(long = "as")]
        user: String,
        #[arg(long)]
        workspace: String,
        member: String,
    },
    /// Set a member's workspace role (admin, member, guest)
    Role {
        #[arg(long = "as")]
        user: String,
        #[arg(long)]
        workspace: String,
        member: String,
        role: Role,
    },
    /// Grant extra permission tokens on top of the role defaults
    Grant {
        #[arg(long = "as")]
        user: String,
        #[arg(long)]
        workspace: String,
        member: String,
        #[arg(required = true)]
        permissions: Vec<Permission>,
    },
    /// Channels the user can see
    Channels {
        #[arg(long = "as")]
        user: String,
        workspace: String,
    },
}

#[derive(Subcommand, Debug)]
enum ChannelCommand {
    Create {
        #[arg(long = "as")]
        user: String,
        #[arg(long)]
        workspace: String,
        name: String,
        #[arg(long)]
        private: bool,
    },
    Invite {
        #[arg(long = "as")]
        user: String,
        #[arg(long)]
        channel: String,
        email: String,
    },
    /// Join with a channel code
    Join {
        #[arg(long = "as")]
        user: String,
        code: String,
    },
    Add {
        #[arg(long = "as")]
        user: String,
        #[arg(long)]
        channel: String,
        member: String,
    },
    Leave {
        #[arg(long = "as")]
        user: String,
        channel: String,
    },
    Remove {
        #[arg(long = "as")]
        user: String,
        #[arg(long)]
        channel: String,
        member: String,
    },
    Role {
        #[arg(long = "as")]
        user: String,
        #[arg(long)]
        channel: String,
        member: String,
        role: Role,
    },
    /// Set notification preference (all, mute)
    Notify {
        #[arg(long = "as")]
        user: String,
        #[arg(long)]
        channel: String,
        #[arg(value_parser = parse_preference)]
        preference: NotificationPreference,
    },
}

fn parse_preference(s: &str) -> Result<NotificationPreference, String> {
    NotificationPreference::parse(s).ok_or_else(|| format!("expected `all` or `mute`, got `{}`", s))
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path).with_context(|| format!("loading {}", path.display()))?,
        None => Config::from_env()?,
    };
    if let Some(db) = &args.db {
        config.store.database_path = db.clone();
    }
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }
    if args.json_logs {
        config.logging.json_format = true;
    }
    config.validate()?;
    Ok(config)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

struct Cli {
    config: Config,
    huddle: Huddle,
}

impl Cli {
    fn user(&self, handle: &str) -> Result<User> {
        self.huddle
            .store()
            .find_user_by_handle(handle)?
            .ok_or_else(|| anyhow!("no user with handle `{}`", handle))
    }

    /// Runs one command. A returned handle is a pending message delivery.
    async fn run(&self, command: Command) -> Result<Option<JoinHandle<DeliveryReport>>> {
        let membership = self.huddle.membership();
        match command {
            Command::User(UserCommand::Add { name, email, global_admin }) => {
                print_json(&self.huddle.register_user(&name, &email, global_admin)?)?;
            }

            Command::Workspace(cmd) => match cmd {
                WorkspaceCommand::Create { user, name, private } => {
                    let visibility = if private {
                        WorkspaceVisibility::Private
                    } else {
                        WorkspaceVisibility::Public
                    };
                    let owner = self.user(&user)?;
                    print_json(&membership.create_workspace(&owner.id, &name, visibility).await?)?;
                }
                WorkspaceCommand::Delete { user, workspace } => {
                    membership
                        .delete_workspace(&self.user(&user)?.id, &WorkspaceId::new(workspace))
                        .await?;
                }
                WorkspaceCommand::Invite { user, workspace, email } => {
                    let added = membership
                        .invite_to_workspace(&self.user(&user)?.id, &WorkspaceId::new(workspace), &email)
                        .await?;
                    print_json(&serde_json::json!({ "invited": added }))?;
                }
                WorkspaceCommand::Join { user, code } => {
                    print_json(&membership.join_workspace(&self.user(&user)?.id, &code).await?)?;
                }
                WorkspaceCommand::Leave { user, workspace } => {
                    membership
                        .leave_workspace(&self.user(&user)?.id, &WorkspaceId::new(workspace))
                        .await?;
                }
                WorkspaceCommand::Request { user, workspace } => {
                    let queued = membership
                        .request_to_join(&self.user(&user)?.id, &WorkspaceId::new(workspace))
                        .await?;
                    print_json(&serde_json::json!({ "requested": queued }))?;
                }
                WorkspaceCommand::Approve { user, workspace, requester } => {
                    membership
                        .approve_join_request(
                            &self.user(&user)?.id,
                            &WorkspaceId::new(workspace),
                            &self.user(&requester)?.id,
                        )
                        .await?;
                }
                WorkspaceCommand::Reject { user, workspace, requester } => {
                    membership
                        .reject_join_request(
                            &self.user(&user)?.id,
                            &WorkspaceId::new(workspace),
                            &self.user(&requester)?.id,
                        )
                        .await?;
                }
                WorkspaceCommand::Remove { user, workspace, member } => {
                    membership
                        .remove_workspace_member(
                            &self.user(&user)?.id,
                            &WorkspaceId::new(workspace),
                            &self.user(&member)?.id,
                        )
                        .await?;
                }
                WorkspaceCommand::Role { user, workspace, member, role } => {
                    let record = membership
                        .update_workspace_role(
                            &self.user(&user)?.id,
                            &WorkspaceId::new(workspace),
                            &self.user(&member)?.id,
                            role,
                        )
                        .await?;
                    print_json(&record)?;
                }
                WorkspaceCommand::Grant { user, workspace, member, permissions } => {
                    let set: PermissionSet = permissions.into_iter().collect();
                    let record = membership
                        .grant_permissions(
                            &self.user(&user)?.id,
                            &WorkspaceId::new(workspace),
                            &self.user(&member)?.id,
                            &set,
                        )
                        .await?;
                    print_json(&record)?;
                }
                WorkspaceCommand::Channels { user, workspace } => {
                    let channels = membership
                        .list_channels(&self.user(&user)?.id, &WorkspaceId::new(workspace))
                        .await?;
                    print_json(&channels)?;
                }
            },

            Command::Channel(cmd) => match cmd {
                ChannelCommand::Create { user, workspace, name, private } => {
                    let kind = if private { ChannelKind::Private } else { ChannelKind::Public };
                    let channel = membership
                        .create_channel(&self.user(&user)?.id, &WorkspaceId::new(workspace), &name, kind)
                        .await?;
                    print_json(&channel)?;
                }
                ChannelCommand::Invite { user, channel, email } => {
                    let added = membership
                        .invite_to_channel(&self.user(&user)?.id, &ChannelId::new(channel), &email)
                        .await?;
                    print_json(&serde_json::json!({ "invited": added }))?;
                }
                ChannelCommand::Join { user, code } => {
                    print_json(&membership.join_channel(&self.user(&user)?.id, &code).await?)?;
                }
                ChannelCommand::Add { user, channel, member } => {
                    membership
                        .add_channel_member(&self.user(&user)?.id, &ChannelId::new(channel), &self.user(&member)?.id)
                        .await?;
                }
                ChannelCommand::Leave { user, channel } => {
                    membership
                        .leave_channel(&self.user(&user)?.id, &ChannelId::new(channel))
                        .await?;
                }
                ChannelCommand::Remove { user, channel, member } => {
                    membership
                        .remove_channel_member(&self.user(&user)?.id, &ChannelId::new(channel), &self.user(&member)?.id)
                        .await?;
                }
                ChannelCommand::Role { user, channel, member, role } => {
                    let record = membership
                        .update_channel_role(
                            &self.user(&user)?.id,
                            &ChannelId::new(channel),
                            &self.user(&member)?.id,
                            role,
                        )
                        .await?;
                    print_json(&record)?;
                }
                ChannelCommand::Notify { user, channel, preference } => {
                    membership
                        .set_notification_preference(&self.user(&user)?.id, &ChannelId::new(channel), preference)
                        .await?;
                }
            },

            Command::Post { user, channel, text } => {
                let posted = self
                    .huddle
                    .messages()
                    .send_message(&self.user(&user)?.id, &ChannelId::new(channel), &text)
                    .await?;
                print_json(&posted.message)?;
                return Ok(Some(posted.delivery));
            }

            Command::History { user, channel, limit } => {
                let messages = self
                    .huddle
                    .messages()
                    .history(&self.user(&user)?.id, &ChannelId::new(channel), limit)
                    .await?;
                print_json(&messages)?;
            }

            Command::Resolve { user, workspace, channel } => {
                let channel = channel.map(ChannelId::new);
                let access = self
                    .huddle
                    .resolver()
                    .resolve(&self.user(&user)?.id, &WorkspaceId::new(workspace), channel.as_ref())?;
                print_json(&access)?;
            }

            Command::Notifications { user, unread } => {
                print_json(&membership.list_notifications(&self.user(&user)?.id, unread).await?)?;
            }

            Command::Read { user, id } => {
                membership
                    .mark_notification_read(&self.user(&user)?.id, &NotificationId::new(id))
                    .await?;
            }

            Command::InitConfig { path } => {
                self.config.save_to_file(&path)?;
                println!("wrote {}", path.display());
            }
        }
        Ok(None)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;

    // No store or logging needed to write a config file
    if let Command::InitConfig { path } = &args.command {
        config.save_to_file(path)?;
        println!("wrote {}", path.display());
        return Ok(());
    }

    let log_config = LogConfig::from_config(&config.logging).unwrap_or_else(|e| {
        eprintln!("{}, using 'info'", e);
        LogConfig::new(LogLevel::Info).json_format(config.logging.json_format)
    });
    init_logging_with_config(log_config)?;
    metrics::init_metrics();

    let store = open_store(&config.store).context("opening store")?;
    let broadcaster = Arc::new(RoomBroadcaster::new(config.notifications.broadcast_capacity));
    let coordinator = ShutdownCoordinator::new(Duration::from_secs(5));

    let closer = {
        let broadcaster = broadcaster.clone();
        tokio::spawn(run_until_shutdown(
            coordinator.subscribe(),
            "room-broadcaster",
            std::future::pending(),
            async move { broadcaster.close().await },
        ))
    };

    let cli = Cli {
        huddle: Huddle::new(&config, store, broadcaster, Arc::new(TracingMailer)),
        config,
    };

    let outcome = tokio::select! {
        result = cli.run(args.command) => result,
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted");
            Ok(None)
        }
    };

    let outcome = match outcome {
        Ok(Some(delivery)) => tokio::select! {
            joined = delivery => match joined {
                Ok(report) => {
                    info!(
                        pushed = report.pushed,
                        emailed = report.emailed,
                        failed = report.failed,
                        "delivery finished"
                    );
                    Ok(())
                }
                Err(e) => Err(anyhow!("delivery task failed: {}", e)),
            },
            // The message is stored; only its notifications are abandoned
            _ = tokio::signal::ctrl_c() => {
                warn!("interrupted during delivery");
                coordinator.shutdown_immediately().await;
                Ok(())
            }
        },
        Ok(None) => Ok(()),
        Err(e) => Err(e),
    };

    if !coordinator.is_shutting_down().await {
        coordinator.shutdown().await;
    }
    let _ = closer.await;
    outcome
}

use childhost::{
    ChildHost, CommandLine, HostConfig, LaunchParams, LogFormat, Message, NotificationKind,
    ProcessDescriptor, ProcessKind, SupervisorDelegate, init_tracing,
};
use std::time::Duration;
use tracing::{info, warn};

/// Prints what the child says and reports crashes
struct ShellDelegate;

impl SupervisorDelegate for ShellDelegate {
    fn on_process_launched(&mut self, data: &ProcessDescriptor) {
        info!(child = %data.id, pid = ?data.pid, "Shell launched");
    }

    fn on_process_crashed(&mut self, exit_code: i32) {
        warn!(exit_code, "Shell crashed");
    }

    fn on_message_received(&mut self, message: &Message) -> bool {
        println!("child says: {}", message.body());
        true
    }
}

#[cfg(unix)]
fn shell_command() -> CommandLine {
    CommandLine::new("sh").args([
        "-c",
        "echo ready; read line; echo \"you said $line\"; sleep 1; kill -SEGV $$",
    ])
}

#[cfg(windows)]
fn shell_command() -> CommandLine {
    CommandLine::new("cmd").args([
        "/C",
        "echo ready & set /p line= & call echo you said %line% & exit 3221225477",
    ])
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing(LogFormat::Pretty, "info")?;

    let host = ChildHost::new(HostConfig::default()).start()?;
    let mut notifications = host.subscribe();

    let child = host
        .spawn_stdio_child(
            ProcessKind::Utility,
            ShellDelegate,
            shell_command(),
            LaunchParams::default(),
        )
        .await?;
    host.control().set_name(child, "demo shell")?;
    host.control().send(child, "hello").await?;

    loop {
        let notification =
            tokio::time::timeout(Duration::from_secs(10), notifications.recv()).await??;
        println!(
            "notification: {:?} for {} ({})",
            notification.kind, notification.data.name, notification.data.kind
        );
        if notification.kind == NotificationKind::HostDisconnected {
            break;
        }
    }

    let metrics = host.control().metrics().await?;
    println!("{}", serde_json::to_string_pretty(&metrics)?);

    host.shutdown().await?;
    Ok(())
}

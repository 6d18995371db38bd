//! CLI command implementations.

use crate::ConfigArgs;
use colored::Colorize;
use guestbook_core::Settings;
use guestbook_server::{
    BroadcastError, Broadcaster, HubConfig, HubServer, LifecycleController,
};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::warn;

type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;

/// Loads settings: file, then environment, then command line.
fn load_settings(args: &ConfigArgs) -> Settings {
    Settings::load_or_default(&args.settings)
        .with_env_overrides()
        .with_connection_override(args.connection.clone())
}

/// Resolves once Ctrl+C is pressed.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Cannot listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
}

fn report_watch(controller: &LifecycleController) {
    match controller.target() {
        Some(target) => println!("{} Watching {}", "✓".green(), target.path.display()),
        None => println!(
            "{} Live refresh unavailable, continuing without it",
            "⚠".yellow()
        ),
    }
}

/// Start the hub and the database watcher.
pub async fn serve(args: &ConfigArgs, listen: Option<SocketAddr>) -> Result<()> {
    println!("{}", "Starting Guestbook live refresh...".cyan());

    let settings = load_settings(args);
    let mut config = HubConfig::from_settings(&settings.live_refresh);
    if let Some(addr) = listen {
        config.addr = addr;
    }
    let hub_path = config.path.clone();

    let server = HubServer::bind(config).await?;
    let addr = server.local_addr()?;

    let controller = LifecycleController::new(&settings, Arc::new(server.handle()));
    controller.start();
    report_watch(&controller);

    println!("{} Hub on ws://{}{}", "✓".green(), addr, hub_path);
    println!("  Press {} to stop", "Ctrl+C".cyan());

    let served = server.run_until(shutdown_signal()).await;
    controller.stop();
    served?;

    println!("{} Stopped", "✓".green());
    Ok(())
}

/// Prints each forwarded notification instead of sending it anywhere.
#[derive(Default)]
struct ConsoleBroadcaster {
    sent: AtomicUsize,
}

impl Broadcaster for ConsoleBroadcaster {
    fn broadcast_all(&self, event: &str) -> std::result::Result<(), BroadcastError> {
        let n = self.sent.fetch_add(1, Ordering::SeqCst) + 1;
        println!("{} {} {}", "●".green(), event.cyan(), format!("#{}", n).dimmed());
        Ok(())
    }
}

/// Watch the database and print notifications.
pub async fn watch(args: &ConfigArgs) -> Result<()> {
    let settings = load_settings(args);
    let console = Arc::new(ConsoleBroadcaster::default());
    let controller = LifecycleController::new(&settings, console.clone());

    controller.start();
    report_watch(&controller);
    if !controller.is_watching() {
        return Err("nothing to watch".into());
    }
    println!(
        "  Debounce {}ms, press {} to stop",
        settings.live_refresh.debounce_ms,
        "Ctrl+C".cyan()
    );

    shutdown_signal().await;
    controller.stop();

    println!(
        "{} {} notification(s) sent",
        "✓".green(),
        console.sent.load(Ordering::SeqCst)
    );
    Ok(())
}

/// Show the resolved configuration.
pub fn check(args: &ConfigArgs) -> Result<()> {
    let settings = load_settings(args);
    let live = &settings.live_refresh;

    println!("{}", "Guestbook Live Refresh".cyan().bold());
    println!();
    println!(
        "  {} {}",
        "Settings:".dimmed(),
        if args.settings.exists() {
            args.settings.display().to_string()
        } else {
            format!("{} (not found, defaults)", args.settings.display())
        }
    );
    println!("  {} {}", "Connection:".dimmed(), settings.connection_string());
    println!("  {} ws://{}{}", "Hub:".dimmed(), live.listen, live.hub_path);
    println!("  {} {}ms", "Debounce:".dimmed(), live.debounce_ms);
    println!("  {} {}s", "Keep-alive:".dimmed(), live.keep_alive_secs);
    println!();

    let target = settings.watch_target()?;
    println!("  {} {}", "Database:".dimmed(), target.path.display());

    let dir_ok = target.directory.is_dir();
    let file_ok = target.path.is_file();
    println!(
        "  {} {} {}",
        if dir_ok { "✓".green() } else { "✗".red() },
        "Directory".dimmed(),
        target.directory.display()
    );
    println!(
        "  {} {} {}",
        if file_ok { "✓".green() } else { "•".blue() },
        "File".dimmed(),
        if file_ok {
            target.file_name.clone()
        } else {
            format!("{} (not created yet)", target.file_name)
        }
    );

    if !dir_ok {
        println!();
        println!(
            "{} The watcher can't start until {} exists.",
            "⚠".yellow(),
            target.directory.display()
        );
    }

    Ok(())
}

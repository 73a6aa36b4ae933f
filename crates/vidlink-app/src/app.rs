use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, info, warn};
use vidlink_core::{
    ClientConfig, DirectoryError, FrameCodec, RawCodec, UserProfile, LOCAL_PROTOCOLS,
};
use vidlink_discovery::{detect_local_ip, DirectoryClient};
use vidlink_signaling::{AutoAnswer, CallControl, CallUi, LocalIdentity};
use vidlink_transport::{AdaptiveSettings, JitterBuffer, MediaReceiver, VideoSender};

use crate::console::{self, Command, ConsoleUi, HELP};
use crate::media;

const DEFAULT_TCP_PORT: u16 = 10000;
const DEFAULT_UDP_PORT: u16 = 10001;

/// Client main loop.
///
/// # Environment
/// - `VIDLINK_CONFIG`: path to a JSON config file (defaults otherwise)
/// - `VIDLINK_USER`: nickname, defaults to the host name
/// - `VIDLINK_PASSWORD`: directory password, prompted for when unset
/// - `VIDLINK_TCP_PORT` / `VIDLINK_UDP_PORT`: control and video ports
/// - `VIDLINK_AUTO_ANSWER=1`: accept every incoming call
///
/// # Flow
/// 1. Register with the directory server (re-prompting on a wrong password)
/// 2. Bind the control listener and the video socket
/// 3. Spawn the listener, command, ingest and pacing loops
/// 4. Run console commands until `quit`
/// 5. Hang up, stop every loop, unregister
pub async fn run() -> Result<()> {
    // ── Configuration ──────────────────────────────────────────────────────
    let config = load_config()?;
    let profile = load_profile()?;
    let mut lines = console::spawn_stdin_reader();

    // ── Directory registration ─────────────────────────────────────────────
    let local_ip = detect_local_ip();
    let mut directory = DirectoryClient::connect(&config.directory_addr())
        .await
        .with_context(|| format!("connecting to directory {}", config.directory_addr()))?;
    register(&mut directory, &profile, local_ip, &mut lines).await?;
    let directory = Arc::new(Mutex::new(directory));

    // ── Sockets ────────────────────────────────────────────────────────────
    let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, profile.tcp_port))
        .await
        .with_context(|| format!("binding control port {}", profile.tcp_port))?;
    let video_rx = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, profile.udp_port))
        .await
        .with_context(|| format!("binding video port {}", profile.udp_port))?;
    let video_tx = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
        .await
        .context("binding outbound video socket")?;

    // ── Media path ─────────────────────────────────────────────────────────
    let settings = Arc::new(AdaptiveSettings::new(config.qos.max_fps));
    let (report_tx, mut report_rx) = mpsc::unbounded_channel();
    let buffer = Arc::new(JitterBuffer::new(config.qos.clone(), settings.clone(), Some(report_tx)));
    let codec: Arc<dyn FrameCodec> = Arc::new(RawCodec);
    let receiver = MediaReceiver::new(Arc::new(video_rx), buffer.clone(), codec.clone());
    let sender = VideoSender::new(Arc::new(video_tx), codec);
    let ingest = tokio::spawn(receiver.clone().run());

    // ── Call control ───────────────────────────────────────────────────────
    let console_ui = Arc::new(ConsoleUi::new(config.call_timeout()));
    let ui: Arc<dyn CallUi> = if auto_answer() {
        info!("Auto-answer enabled");
        Arc::new(AutoAnswer)
    } else {
        console_ui.clone()
    };
    let identity = LocalIdentity { nick: profile.username.clone(), video_port: profile.udp_port };
    let control = CallControl::new(identity, config.call_timeout(), directory.clone(), ui, buffer.clone());
    control.spawn_loops(listener);

    let reporter = {
        let control = control.clone();
        tokio::spawn(async move {
            while let Some(count) = report_rx.recv().await {
                if let Err(e) = control.send_loss_report(count).await {
                    debug!("Loss report not sent: {}", e);
                }
            }
        })
    };

    let (stop_tx, stop_rx) = watch::channel(false);
    let outbound = tokio::spawn(media::pace_outbound(
        control.clone(),
        sender,
        settings.clone(),
        stop_rx.clone(),
    ));
    let inbound = tokio::spawn(media::render_inbound(
        control.clone(),
        receiver.clone(),
        config.qos.max_fps,
        stop_rx,
    ));

    info!(
        "{} ready: control {}:{} video {}. Type 'help' for commands.",
        profile.username, local_ip, profile.tcp_port, profile.udp_port
    );

    // ── Console ────────────────────────────────────────────────────────────
    loop {
        let line = tokio::select! {
            line = lines.recv() => line,
            _ = tokio::signal::ctrl_c() => break,
        };
        let Some(line) = line else {
            info!("stdin closed; press Ctrl-C to exit");
            let _ = tokio::signal::ctrl_c().await;
            break;
        };
        if line.trim().is_empty() || console_ui.answer(&line) {
            continue;
        }
        match line.parse::<Command>() {
            Ok(Command::Quit) => break,
            Ok(cmd) => execute(cmd, &control, &directory).await,
            Err(msg) => println!("{msg}"),
        }
    }

    // ── Shutdown ───────────────────────────────────────────────────────────
    info!("Shutting down...");
    control.shutdown().await;
    let _ = stop_tx.send(true);
    for task in [outbound, inbound] {
        if let Err(e) = task.await {
            warn!("Pacing loop ended abnormally: {}", e);
        }
    }
    reporter.abort();
    if let Err(e) = receiver.stop().await {
        warn!("Could not wake the media receiver: {}", e);
    }
    if let Err(e) = ingest.await {
        warn!("Media receiver ended abnormally: {}", e);
    }
    let _ = directory.lock().await.quit().await;
    Ok(())
}

// ── Startup helpers ────────────────────────────────────────────────────────────

fn load_config() -> Result<ClientConfig> {
    let Ok(path) = std::env::var("VIDLINK_CONFIG") else {
        return Ok(ClientConfig::default());
    };
    let json = std::fs::read_to_string(&path).with_context(|| format!("reading {path}"))?;
    let config = ClientConfig::from_json(&json).with_context(|| format!("parsing {path}"))?;
    info!("Loaded configuration from {}", path);
    Ok(config)
}

fn load_profile() -> Result<UserProfile> {
    let username = match std::env::var("VIDLINK_USER") {
        Ok(name) if !name.trim().is_empty() => name.trim().to_owned(),
        _ => hostname::get()
            .context("reading host name")?
            .to_string_lossy()
            .into_owned(),
    };
    if username.contains(char::is_whitespace) {
        bail!("nickname {username:?} must not contain whitespace");
    }
    Ok(UserProfile::new(
        username,
        env_port("VIDLINK_TCP_PORT", DEFAULT_TCP_PORT)?,
        env_port("VIDLINK_UDP_PORT", DEFAULT_UDP_PORT)?,
    ))
}

fn env_port(name: &str, default: u16) -> Result<u16> {
    match std::env::var(name) {
        Ok(value) => value.trim().parse().with_context(|| format!("{name}={value} is not a port")),
        Err(_) => Ok(default),
    }
}

fn auto_answer() -> bool {
    matches!(std::env::var("VIDLINK_AUTO_ANSWER").as_deref(), Ok("1") | Ok("true"))
}

/// Register, asking for the password again for as long as the server
/// rejects it.
async fn register(
    directory: &mut DirectoryClient,
    profile: &UserProfile,
    local_ip: IpAddr,
    lines: &mut mpsc::UnboundedReceiver<String>,
) -> Result<()> {
    let mut password = match std::env::var("VIDLINK_PASSWORD") {
        Ok(password) => password,
        Err(_) => prompt(lines, "Password:").await?,
    };
    let ip = local_ip.to_string();
    loop {
        match directory
            .register(&profile.username, &password, &ip, profile.tcp_port, LOCAL_PROTOCOLS)
            .await
        {
            Ok(_) => return Ok(()),
            Err(DirectoryError::WrongPassword) => {
                warn!("Directory rejected the password for {}", profile.username);
                password = prompt(lines, "Wrong password, try again:").await?;
            }
            Err(e) => return Err(e).context("registering with the directory"),
        }
    }
}

async fn prompt(lines: &mut mpsc::UnboundedReceiver<String>, question: &str) -> Result<String> {
    println!("{question}");
    match lines.recv().await {
        Some(line) => Ok(line.trim().to_owned()),
        None => bail!("stdin closed before a password was entered"),
    }
}

// ── Console commands ───────────────────────────────────────────────────────────

async fn execute(cmd: Command, control: &CallControl, directory: &Mutex<DirectoryClient>) {
    match cmd {
        Command::Call(nick) => match control.connect_to(&nick).await {
            Ok(port) => println!("In call with {nick} (video port {port})"),
            Err(e) => println!("Call to {nick} failed: {e}"),
        },
        Command::Hold => match control.set_hold(true).await {
            Ok(()) => println!("Call on hold"),
            Err(e) => println!("{e}"),
        },
        Command::Resume => match control.set_hold(false).await {
            Ok(()) => println!("Call resumed"),
            Err(e) => println!("{e}"),
        },
        Command::End => {
            if let Err(e) = control.end_call().await {
                debug!("CALL_END not sent: {}", e);
            }
            control.disconnect().await;
            println!("Hung up");
        }
        Command::List => match directory.lock().await.list_users().await {
            Ok(users) => {
                println!("{} registered users:", users.len());
                for user in users {
                    println!("  {:<20} {}:{}", user.nick, user.ip, user.port);
                }
            }
            Err(e) => println!("Could not list users: {e}"),
        },
        Command::Status => {
            let snapshot = control.snapshot().await;
            match &snapshot.peer_name {
                Some(peer) => println!("{:?} with {peer} (media {:?})", snapshot.state, snapshot.media_peer.addr()),
                None => println!("{:?}", snapshot.state),
            }
        }
        Command::Help => println!("{HELP}"),
        Command::Quit => {}
    }
}

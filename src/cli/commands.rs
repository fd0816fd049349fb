use std::fs;
use std::path::Path;
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use nix::sys::signal::Signal;

use crate::cli::{Cli, Command};
use crate::core::config::ContainerConfig;
use crate::core::factory::Factory;

/// Dispatch a parsed CLI command to the appropriate handler.
pub fn dispatch(cli: Cli) -> Result<()> {
    // `init` runs inside the new namespaces before a runtime root is
    // meaningful, and carries its own config over configPipe instead.
    if let Command::Init = cli.command {
        return cmd_init();
    }

    let factory = match cli.root {
        Some(root) => Factory::new(root, true).context("failed to initialize runtime root")?,
        None => Factory::with_default_root().context("failed to initialize runtime root")?,
    };

    match cli.command {
        Command::Spec => cmd_spec(),
        Command::Create { spec_path } => cmd_create(&factory, &spec_path),
        Command::Start { id } => cmd_start(&factory, &id),
        Command::Run { spec_path } => cmd_run(&factory, &spec_path),
        Command::Ps => cmd_ps(&factory),
        Command::Rm { id } => cmd_rm(&factory, &id),
        Command::Logs { id } => cmd_logs(&factory, &id),
        Command::Kill { id, signal, all } => cmd_kill(&factory, &id, &signal, all),
        Command::Pause { id } => cmd_pause(&factory, &id),
        Command::Resume { id } => cmd_resume(&factory, &id),
        Command::Exec { id, cmd } => cmd_exec(&factory, &id, &cmd),
        Command::Init => unreachable!("handled above"),
    }
}

// ─── spec ───────────────────────────────────────────────────────────────────

fn cmd_spec() -> Result<()> {
    let path = Path::new(crate::core::constant::SPEC_FILE);
    if path.exists() {
        bail!("{} already exists", path.display());
    }
    let example = ContainerConfig::example("my-container");
    let json = serde_json::to_string_pretty(&example)?;

    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o666)
        .open(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    file.write_all(json.as_bytes())
        .with_context(|| format!("failed to write {}", path.display()))?;
    println!("{}", path.display());
    Ok(())
}

fn load_spec(spec_path: &Path) -> Result<ContainerConfig> {
    let data = fs::read_to_string(spec_path)
        .with_context(|| format!("failed to read spec file {}", spec_path.display()))?;
    let config: ContainerConfig = serde_json::from_str(&data)
        .with_context(|| format!("failed to parse spec file {}", spec_path.display()))?;
    Ok(config)
}

// ─── create ─────────────────────────────────────────────────────────────────

fn cmd_create(factory: &Factory, spec_path: &Path) -> Result<()> {
    let config = load_spec(spec_path)?;
    let id = config.id.clone();
    let mut container = factory.create(config).context("failed to create container")?;
    container
        .start(&factory.network, false)
        .context("failed to bootstrap container")?;
    println!("{id}");
    Ok(())
}

// ─── start ──────────────────────────────────────────────────────────────────

fn cmd_start(factory: &Factory, id_prefix: &str) -> Result<()> {
    let mut container = factory
        .load_by_prefix(id_prefix)
        .context("failed to load container")?;
    container
        .start(&factory.network, true)
        .context("failed to start container")?;
    println!("{}", container.id);
    Ok(())
}

// ─── run ────────────────────────────────────────────────────────────────────

fn cmd_run(factory: &Factory, spec_path: &Path) -> Result<()> {
    let config = load_spec(spec_path)?;
    let id = config.id.clone();
    let mut container = factory.create(config).context("failed to create container")?;
    container
        .start(&factory.network, true)
        .context("failed to start container")?;
    println!("{id}");
    Ok(())
}

// ─── ps ─────────────────────────────────────────────────────────────────────

fn cmd_ps(factory: &Factory) -> Result<()> {
    let ids = factory.list().context("failed to list containers")?;

    println!("{:<18} {:<10} {:<24} {}", "CONTAINER ID", "STATUS", "CREATED", "COMMAND");

    for id in ids {
        let mut container = match factory.load(&id) {
            Ok(c) => c,
            Err(_) => continue,
        };
        let status = container.refresh_status().unwrap_or(container.status);

        let created = container.created_time.format("%Y-%m-%d %H:%M:%S UTC");
        let cmd_str = container.config.process.args.join(" ");
        let cmd_display = if cmd_str.len() > 40 {
            format!("{}...", &cmd_str[..37])
        } else {
            cmd_str
        };

        let short_id: String = container.id.chars().take(16).collect();
        println!("{short_id:<18} {status:<10} {created:<24} {cmd_display}");
    }

    Ok(())
}

// ─── rm ─────────────────────────────────────────────────────────────────────

fn cmd_rm(factory: &Factory, id_prefix: &str) -> Result<()> {
    let container = factory
        .load_by_prefix(id_prefix)
        .context("failed to load container")?;
    let id = container.id.clone();
    container
        .destroy(&factory.network)
        .context("failed to destroy container")?;
    println!("Removed container {id}");
    Ok(())
}

// ─── logs ───────────────────────────────────────────────────────────────────

fn cmd_logs(factory: &Factory, id_prefix: &str) -> Result<()> {
    // A non-spec convenience kept from teacher's `logs` command. This
    // runtime does not redirect the container's stdout/stderr to files (no
    // log sink is part of the lifecycle engine spec'd here), so this
    // reports the same status/metadata `ps` shows for a single container
    // rather than tailing output that was never captured.
    let mut container = factory
        .load_by_prefix(id_prefix)
        .context("failed to load container")?;
    let status = container.refresh_status().unwrap_or(container.status);
    println!("id:      {}", container.id);
    println!("status:  {status}");
    println!("created: {}", container.created_time.format("%Y-%m-%d %H:%M:%S UTC"));
    if let Some(fp) = container.init_process {
        println!("pid:     {}", fp.pid);
    }
    Ok(())
}

// ─── kill ───────────────────────────────────────────────────────────────────

fn cmd_kill(factory: &Factory, id_prefix: &str, signal: &str, all: bool) -> Result<()> {
    let sig = parse_signal(signal)?;
    let mut container = factory
        .load_by_prefix(id_prefix)
        .context("failed to load container")?;
    container
        .signal(sig, all)
        .context("failed to signal container")?;
    Ok(())
}

fn parse_signal(name: &str) -> Result<Signal> {
    if let Ok(num) = name.parse::<i32>() {
        return Signal::try_from(num).with_context(|| format!("unknown signal number {num}"));
    }
    let normalized = if name.to_uppercase().starts_with("SIG") {
        name.to_uppercase()
    } else {
        format!("SIG{}", name.to_uppercase())
    };
    Signal::from_str(&normalized).with_context(|| format!("unknown signal '{name}'"))
}

// ─── pause / resume ─────────────────────────────────────────────────────────

fn cmd_pause(factory: &Factory, id_prefix: &str) -> Result<()> {
    let mut container = factory
        .load_by_prefix(id_prefix)
        .context("failed to load container")?;
    container.pause().context("failed to pause container")?;
    Ok(())
}

fn cmd_resume(factory: &Factory, id_prefix: &str) -> Result<()> {
    let mut container = factory
        .load_by_prefix(id_prefix)
        .context("failed to load container")?;
    container.resume().context("failed to resume container")?;
    Ok(())
}

// ─── exec ───────────────────────────────────────────────────────────────────

fn cmd_exec(factory: &Factory, id_prefix: &str, cmd: &[String]) -> Result<()> {
    let mut container = factory
        .load_by_prefix(id_prefix)
        .context("failed to load container")?;
    let status = container.refresh_status()?;
    if status != crate::core::container::Status::Running {
        bail!("container {} is not running", container.id);
    }

    #[cfg(not(target_os = "linux"))]
    {
        bail!("exec is only supported on Linux");
    }

    #[cfg(target_os = "linux")]
    {
        let pid = container
            .init_process
            .map(|fp| fp.pid)
            .context("container has no recorded init pid")?;
        let code = crate::platform::linux::process::exec_in_container(pid, cmd)
            .context("exec failed")?;
        std::process::exit(code);
    }
}

// ─── init ───────────────────────────────────────────────────────────────────

fn cmd_init() -> Result<()> {
    #[cfg(not(target_os = "linux"))]
    {
        bail!("init is only supported on Linux");
    }

    #[cfg(target_os = "linux")]
    {
        crate::platform::linux::init::run().map_err(|e| anyhow::anyhow!("{e}"))
    }
}

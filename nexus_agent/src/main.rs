//! nexus_agent: headless consumer that prints live telemetry snapshots.

use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use nexus_telemetry::{
    CounterSource, ScriptedSource, SysinfoSource, TelemetryConfig, TelemetryEngine,
    TelemetrySnapshot,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

const USAGE: &str = "[--interval-ms N] [--ticks N] [--seed N] [--iface NAME] \
                     [--volume PATH] [--config PATH] [--json] [--demo]";

#[derive(Debug, Default, PartialEq)]
struct ParsedArgs {
    help: bool,
    interval_ms: Option<u64>,
    ticks: Option<u64>,
    seed: Option<u64>,
    iface: Option<String>,
    volume: Option<String>,
    config: Option<PathBuf>,
    json: bool,
    demo: bool,
}

fn usage(prog: &str) -> String {
    format!("Usage: {prog} {USAGE}")
}

fn parse_args<I: IntoIterator<Item = String>>(args: I) -> Result<ParsedArgs, String> {
    let mut it = args.into_iter();
    let prog = it.next().unwrap_or_else(|| "nexus_agent".into());
    let mut out = ParsedArgs::default();

    while let Some(arg) = it.next() {
        // --flag=value
        let (flag, inline) = match arg.split_once('=') {
            Some((f, v)) if f.starts_with("--") => (f.to_string(), Some(v.to_string())),
            _ => (arg.clone(), None),
        };
        let mut value = |name: &str| -> Result<String, String> {
            match inline.clone().or_else(|| it.next()) {
                Some(v) if !v.is_empty() => Ok(v),
                _ => Err(format!("{name} needs a value. {}", usage(&prog))),
            }
        };
        let number = |name: &str, v: String| -> Result<u64, String> {
            v.parse::<u64>()
                .map_err(|_| format!("{name} expects a number, got {v:?}. {}", usage(&prog)))
        };

        match flag.as_str() {
            "-h" | "--help" => out.help = true,
            "--json" => out.json = true,
            "--demo" => out.demo = true,
            "--interval-ms" => {
                out.interval_ms = Some(number("--interval-ms", value("--interval-ms")?)?)
            }
            "--ticks" => out.ticks = Some(number("--ticks", value("--ticks")?)?),
            "--seed" => out.seed = Some(number("--seed", value("--seed")?)?),
            "--iface" => out.iface = Some(value("--iface")?),
            "--volume" => out.volume = Some(value("--volume")?),
            "--config" => out.config = Some(PathBuf::from(value("--config")?)),
            _ => return Err(format!("Unexpected argument {arg:?}. {}", usage(&prog))),
        }
    }
    Ok(out)
}

fn build_config(args: &ParsedArgs) -> anyhow::Result<TelemetryConfig> {
    let mut cfg = match &args.config {
        Some(path) => {
            let mut c = TelemetryConfig::load_from(path)?;
            c.apply_env();
            c
        }
        None => TelemetryConfig::load()?,
    };
    // command line wins over file and environment
    if let Some(ms) = args.interval_ms {
        cfg.interval_ms = ms;
    }
    if let Some(seed) = args.seed {
        cfg.seed = Some(seed);
    }
    if let Some(iface) = &args.iface {
        cfg.interface = Some(iface.clone());
    }
    if let Some(volume) = &args.volume {
        cfg.disk_volume = volume.clone();
    }
    Ok(cfg.validated())
}

fn human_line(s: &TelemetrySnapshot) -> String {
    let pct = |v: Option<f32>| v.map_or_else(|| "--".to_string(), |v| format!("{v:.1}%"));
    let disk = s
        .disk
        .map_or_else(|| "--".to_string(), |d| d.summary());
    let top = s
        .top_processes
        .first()
        .map_or_else(|| "--".to_string(), |p| p.to_string());
    let mut line = format!(
        "[{}] #{} cpu {} mem {} disk {} down {:.1} KB/s up {:.1} KB/s top {}",
        s.clock,
        s.tick,
        pct(s.cpu_percent),
        pct(s.mem_percent),
        disk,
        s.rates.download_kbps,
        s.rates.upload_kbps,
        top,
    );
    if let Some(ev) = &s.new_event {
        line.push_str(&format!(" event {ev}"));
    }
    if !s.unavailable.is_empty() {
        let names: Vec<&str> = s.unavailable.iter().map(|m| m.as_str()).collect();
        line.push_str(&format!(" stale {}", names.join(",")));
    }
    line
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let parsed = parse_args(env::args()).map_err(|msg| anyhow!(msg))?;
    if parsed.help {
        let prog = env::args().next().unwrap_or_else(|| "nexus_agent".into());
        println!("{}", usage(&prog));
        return Ok(());
    }

    // stdout carries snapshots only
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cfg = build_config(&parsed).context("loading telemetry config")?;
    let source: Arc<dyn CounterSource> = if parsed.demo {
        info!("demo mode: using scripted counters");
        Arc::new(ScriptedSource::demo())
    } else {
        Arc::new(SysinfoSource::new())
    };

    let mut engine = TelemetryEngine::new(cfg, source);
    let effective = engine.config();
    info!(
        interval_ms = effective.interval_ms,
        volume = %effective.disk_volume,
        iface = effective.interface.as_deref().unwrap_or("auto"),
        "telemetry config resolved"
    );
    let mut sub = engine.subscribe();
    engine.start()?;

    let mut seen: u64 = 0;
    loop {
        if parsed.ticks.is_some_and(|n| seen >= n) {
            break;
        }
        tokio::select! {
            snap = sub.next() => {
                let Some(snap) = snap else { break };
                if parsed.json {
                    println!("{}", serde_json::to_string(&snap)?);
                } else {
                    println!("{}", human_line(&snap));
                }
                seen += 1;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
        }
    }

    engine.stop().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(v: &[&str]) -> Vec<String> {
        std::iter::once("nexus_agent")
            .chain(v.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn parses_space_and_equals_forms() {
        let p = parse_args(args(&[
            "--interval-ms",
            "250",
            "--ticks=3",
            "--iface=eth0",
            "--volume",
            "/data",
            "--json",
        ]))
        .unwrap();
        assert_eq!(p.interval_ms, Some(250));
        assert_eq!(p.ticks, Some(3));
        assert_eq!(p.iface.as_deref(), Some("eth0"));
        assert_eq!(p.volume.as_deref(), Some("/data"));
        assert!(p.json);
        assert!(!p.demo);
    }

    #[test]
    fn rejects_unknown_and_malformed() {
        let err = parse_args(args(&["--bogus"])).unwrap_err();
        assert!(err.contains("Usage:"));
        assert!(parse_args(args(&["--ticks", "many"])).is_err());
        assert!(parse_args(args(&["--seed"])).is_err());
        assert!(parse_args(args(&["--iface="])).is_err());
    }

    #[test]
    fn help_flag() {
        assert!(parse_args(args(&["-h"])).unwrap().help);
        assert_eq!(parse_args(args(&[])).unwrap(), ParsedArgs::default());
    }

    #[test]
    fn cli_overrides_config_file() {
        let td = tempfile::tempdir().unwrap();
        let path = td.path().join("telemetry.json");
        TelemetryConfig {
            interval_ms: 5_000,
            top_k: 2,
            ..TelemetryConfig::default()
        }
        .save(&path)
        .unwrap();

        let p = parse_args(args(&[
            "--config",
            path.to_str().unwrap(),
            "--interval-ms",
            "100",
            "--seed",
            "4",
        ]))
        .unwrap();
        let cfg = build_config(&p).unwrap();
        assert_eq!(cfg.interval_ms, 100);
        assert_eq!(cfg.top_k, 2);
        assert_eq!(cfg.seed, Some(4));
    }
}

use std::io::{self, BufRead};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use colored::Colorize;
use tracing::{debug, info};

use kvault_blob::{BlobEngine, BlobStore};
use kvault_kv::{KeyValueEngine, KeyValueStore};
use kvault_types::{Digest, NamespaceId, Value};
use kvault_watch::{ChangeWatcher, PollingEventSource, SingleNodeCluster};

use crate::cli::*;
use crate::config::KvaultConfig;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = KvaultConfig::resolve(cli.config.as_deref(), cli.kv_dir, cli.blob_dir)?;
    debug!(
        kv = %config.kv.directory.display(),
        blob = %config.blob.directory.display(),
        command = ?cli.command,
        "dispatching command"
    );
    match cli.command {
        Command::Kv(cmd) => cmd_kv(&config, cmd),
        Command::Blob(cmd) => cmd_blob(&config, cmd),
        Command::Watch(args) => cmd_watch(&config, args),
    }
}

fn namespace(raw: &str) -> anyhow::Result<NamespaceId> {
    Ok(NamespaceId::new(raw)?)
}

fn render(value: &Value) -> String {
    match value {
        Value::Null => "null".into(),
        Value::Bool(b) => b.to_string(),
        Value::Int(n) => n.to_string(),
        Value::Float(f) => f.to_string(),
        Value::String(s) => s.clone(),
        other => serde_json::to_string(other).unwrap_or_else(|_| format!("{other:?}")),
    }
}

fn open_kv(config: &KvaultConfig) -> anyhow::Result<KeyValueEngine> {
    KeyValueEngine::open(&config.kv).with_context(|| {
        format!(
            "cannot open key-value store at {}",
            config.kv.directory.display()
        )
    })
}

fn open_blob(config: &KvaultConfig) -> anyhow::Result<BlobEngine> {
    BlobEngine::open(&config.blob).with_context(|| {
        format!(
            "cannot open blob store at {}",
            config.blob.directory.display()
        )
    })
}

fn cmd_kv(config: &KvaultConfig, cmd: KvCommand) -> anyhow::Result<()> {
    let engine = open_kv(config)?;
    match cmd {
        KvCommand::Get { namespace: ns, key } => {
            match engine.get(&namespace(&ns)?, &key)? {
                Some(value) => println!("{}", render(&value)),
                None => anyhow::bail!("{ns}/{key} not found"),
            }
        }
        KvCommand::Put {
            namespace: ns,
            key,
            value,
            json,
        } => {
            let value = if json {
                serde_json::from_str(&value).context("value is not a tagged JSON value")?
            } else {
                Value::parse_literal(&value)
            };
            let kind = value.type_tag();
            let previous = engine.put(&namespace(&ns)?, &key, value)?;
            let verb = if previous.is_some() { "Updated" } else { "Set" };
            println!("{} {} {}/{} ({})", "✓".green(), verb, ns.bold(), key.yellow(), kind.dimmed());
        }
        KvCommand::Rm { namespace: ns, key } => match engine.remove(&namespace(&ns)?, &key)? {
            Some(previous) => println!(
                "{} Removed {}/{} (was {})",
                "✓".green(),
                ns.bold(),
                key.yellow(),
                render(&previous)
            ),
            None => println!("{}/{} was not set", ns.bold(), key.yellow()),
        },
        KvCommand::Ls { namespace: ns } => {
            let mut empty = true;
            for (key, value) in engine.stream(&namespace(&ns)?)? {
                empty = false;
                println!("{} = {}", key.yellow(), render(&value));
            }
            if empty {
                println!("Namespace {} is empty.", ns.bold());
            }
        }
        KvCommand::Ids => {
            let ids: Vec<_> = engine.id_stream()?.collect();
            if ids.is_empty() {
                println!("No namespaces.");
            }
            for id in ids {
                println!("{}", id.as_str().bold());
            }
        }
        KvCommand::Drop { namespace: ns } => {
            if engine.delete_storage(&namespace(&ns)?)? {
                println!("{} Deleted namespace {}", "✓".green(), ns.bold());
            } else {
                println!("Namespace {} did not exist.", ns.bold());
            }
        }
    }
    Ok(())
}

fn cmd_blob(config: &KvaultConfig, cmd: BlobCommand) -> anyhow::Result<()> {
    let engine = open_blob(config)?;
    match cmd {
        BlobCommand::Put { namespace: ns, file } => {
            let digest = Digest::of_file(&file)
                .with_context(|| format!("cannot hash {}", file.display()))?;
            if engine.write(&namespace(&ns)?, &digest, &file)? {
                println!("{} Stored {}", "✓".green(), digest.as_str().cyan());
            } else {
                println!("Already stored {}", digest.as_str().cyan());
            }
        }
        BlobCommand::Get {
            namespace: ns,
            digest,
            output,
        } => {
            engine.read(&namespace(&ns)?, &Digest::new(digest.as_str())?, &output)?;
            println!("{} Wrote {}", "✓".green(), output.display());
        }
        BlobCommand::Rm { namespace: ns, digest } => {
            engine.delete(&namespace(&ns)?, &Digest::new(digest.as_str())?)?;
            println!("{} Deleted {}", "✓".green(), digest.cyan());
        }
        BlobCommand::Exists { namespace: ns, digest } => {
            if engine.exists(&namespace(&ns)?, &Digest::new(digest.as_str())?)? {
                println!("{}", "present".green());
            } else {
                println!("{}", "absent".red());
            }
        }
        BlobCommand::Ls { namespace: None } => {
            let ids = engine.namespaces()?;
            if ids.is_empty() {
                println!("No namespaces.");
            }
            for id in ids {
                println!("{}", id.as_str().bold());
            }
        }
        BlobCommand::Ls {
            namespace: Some(ns),
        } => {
            for digest in engine.digests(&namespace(&ns)?)? {
                println!("{}", digest.as_str().cyan());
            }
        }
        BlobCommand::Drop { namespace: ns } => {
            if engine.delete_storage(&namespace(&ns)?)? {
                println!("{} Deleted namespace {}", "✓".green(), ns.bold());
            } else {
                println!("Namespace {} did not exist.", ns.bold());
            }
        }
        BlobCommand::Sweep {
            namespace: ns,
            older_than,
        } => {
            let removed = engine.sweep_temp(&namespace(&ns)?, Duration::from_secs(older_than))?;
            println!("{} Removed {} stale upload(s)", "✓".green(), removed);
        }
    }
    Ok(())
}

fn cmd_watch(config: &KvaultConfig, args: WatchArgs) -> anyhow::Result<()> {
    if !config.watch.enabled {
        anyhow::bail!("watching is disabled in the configuration");
    }
    let interval = args
        .interval_ms
        .map(|ms| Duration::from_millis(ms.max(1)))
        .unwrap_or_else(|| config.watch.poll_interval());

    let engine = Arc::new(open_kv(config)?);
    let reloader = Arc::clone(&engine);
    let cluster = Arc::new(SingleNodeCluster::new().with_handler(move |task| {
        let entries = reloader.reload(&task.namespace)?;
        info!(namespace = %task.namespace, entries, "reloaded namespace");
        println!("{} Reloaded {} ({} entries)", "↻".cyan(), task.namespace.as_str().bold(), entries);
        Ok(())
    }));

    // Read every document once so the watcher has timestamps to compare.
    for id in engine.id_stream()? {
        let entries = engine.reload(&id)?;
        debug!(namespace = %id, entries, "warmed namespace");
    }

    let source = PollingEventSource::new(engine.resolver().base(), interval)?;
    let handle = ChangeWatcher::new(Arc::clone(&engine), cluster).spawn(source)?;
    info!(base = %engine.resolver().base().display(), ?interval, "watch started");
    println!(
        "Watching {} every {:?}. Press Enter to stop.",
        engine.resolver().base().display().to_string().bold(),
        interval
    );

    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    handle.shutdown();
    info!("watch stopped");
    println!("{} Stopped.", "✓".green());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::fs;
    use std::path::Path;

    fn run(dir: &Path, args: &[&str]) -> anyhow::Result<()> {
        let kv = dir.join("kv");
        let blob = dir.join("blobs");
        let mut argv = vec![
            "kvault",
            "--kv-dir",
            kv.to_str().unwrap(),
            "--blob-dir",
            blob.to_str().unwrap(),
        ];
        argv.extend_from_slice(args);
        run_command(Cli::try_parse_from(argv).unwrap())
    }

    fn kv_engine(dir: &Path) -> KeyValueEngine {
        KeyValueEngine::open(&kvault_fs::StoreConfig::new(dir.join("kv"))).unwrap()
    }

    #[test]
    fn kv_put_parses_literals() {
        let dir = tempfile::tempdir().unwrap();
        run(dir.path(), &["kv", "put", "cfg", "port", "5432"]).unwrap();
        run(dir.path(), &["kv", "put", "cfg", "host", "db1"]).unwrap();

        let engine = kv_engine(dir.path());
        let cfg = NamespaceId::new("cfg").unwrap();
        assert_eq!(engine.get(&cfg, "port").unwrap(), Some(Value::Int(5432)));
        assert_eq!(engine.get(&cfg, "host").unwrap(), Some(Value::from("db1")));
    }

    #[test]
    fn kv_put_json_value() {
        let dir = tempfile::tempdir().unwrap();
        run(
            dir.path(),
            &["kv", "put", "cfg", "tags", r#"{"type":"list","value":[{"type":"string","value":"a"}]}"#, "--json"],
        )
        .unwrap();
        let engine = kv_engine(dir.path());
        assert_eq!(
            engine.get(&NamespaceId::new("cfg").unwrap(), "tags").unwrap(),
            Some(Value::List(vec![Value::from("a")]))
        );
        assert!(run(dir.path(), &["kv", "put", "cfg", "bad", "{", "--json"]).is_err());
    }

    #[test]
    fn kv_get_missing_key_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = run(dir.path(), &["kv", "get", "cfg", "nope"]).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn kv_rm_and_drop() {
        let dir = tempfile::tempdir().unwrap();
        run(dir.path(), &["kv", "put", "cfg", "k", "v"]).unwrap();
        run(dir.path(), &["kv", "rm", "cfg", "k"]).unwrap();
        run(dir.path(), &["kv", "put", "other", "k", "v"]).unwrap();
        run(dir.path(), &["kv", "drop", "other"]).unwrap();
        run(dir.path(), &["kv", "ls", "cfg"]).unwrap();

        let ids: Vec<_> = kv_engine(dir.path()).id_stream().unwrap().collect();
        assert_eq!(ids, vec![NamespaceId::new("cfg").unwrap()]);
    }

    #[test]
    fn traversal_namespace_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(run(dir.path(), &["kv", "put", "../escape", "k", "v"]).is_err());
        assert!(run(dir.path(), &["blob", "drop", ".."]).is_err());
        assert!(!dir.path().join("escape.json").exists());
    }

    #[test]
    fn blob_put_get_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.bin");
        let output = dir.path().join("out.bin");
        fs::write(&input, b"blob payload").unwrap();
        let digest = Digest::of_bytes(b"blob payload");

        run(dir.path(), &["blob", "put", "art", input.to_str().unwrap()]).unwrap();
        // Second upload is a no-op, not an error.
        run(dir.path(), &["blob", "put", "art", input.to_str().unwrap()]).unwrap();
        run(
            dir.path(),
            &["blob", "get", "art", digest.as_str(), output.to_str().unwrap()],
        )
        .unwrap();
        assert_eq!(fs::read(&output).unwrap(), b"blob payload");

        run(dir.path(), &["blob", "rm", "art", digest.as_str()]).unwrap();
        assert!(run(dir.path(), &["blob", "rm", "art", digest.as_str()]).is_err());
    }

    #[test]
    fn blob_rejects_malformed_digest() {
        let dir = tempfile::tempdir().unwrap();
        assert!(run(dir.path(), &["blob", "exists", "art", "../x"]).is_err());
    }

    #[test]
    fn watch_refuses_when_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kvault.toml");
        fs::write(
            &path,
            "[kv]\ndirectory = \"kv\"\n[blob]\ndirectory = \"blobs\"\n[watch]\nenabled = false\n",
        )
        .unwrap();
        let cli = Cli::try_parse_from(["kvault", "--config", path.to_str().unwrap(), "watch"]).unwrap();
        let err = run_command(cli).unwrap_err();
        assert!(err.to_string().contains("disabled"));
    }

    #[derive(Clone, Default)]
    struct LogBuffer(Arc<std::sync::Mutex<Vec<u8>>>);

    impl io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn dispatch_is_logged_with_resolved_directories() {
        let dir = tempfile::tempdir().unwrap();
        let logs = LogBuffer::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();

        tracing::subscriber::with_default(subscriber, || run(dir.path(), &["kv", "ids"])).unwrap();

        let text = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        assert!(text.contains("dispatching command"), "{text}");
        assert!(text.contains("Ids"), "{text}");
        assert!(text.contains(&dir.path().join("kv").display().to_string()), "{text}");
    }

    #[test]
    fn render_scalars_plainly() {
        assert_eq!(render(&Value::from("db1")), "db1");
        assert_eq!(render(&Value::Int(7)), "7");
        assert_eq!(render(&Value::Null), "null");
        assert!(render(&Value::List(vec![Value::Int(1)])).starts_with('{'));
    }
}

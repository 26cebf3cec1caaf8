use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use env_logger::{Builder, Env};
use log::error;

use libdomain::{
    load_config, AttributeModification, LdapProtocol, ModOp, OpResult, Session, SettingsBuilder,
};

#[derive(Parser, Debug)]
#[command(name = "ldap-client", version, about = "Directory-service client")]
struct Cli {
    /// Path to a `key = value` settings file (see `load_config`).
    #[arg(long, global = true)]
    config: PathBuf,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Connect, bind, and report the resulting connection state.
    Status,

    /// Add an entry. Attributes are repeatable `name=value` pairs.
    Add {
        name: String,
        parent: String,
        prefix: String,
        #[arg(long = "attr")]
        attrs: Vec<String>,
    },

    /// Delete an entry.
    Del { name: String, parent: String, prefix: String },

    /// Replace an entry's attributes.
    Mod {
        name: String,
        parent: String,
        prefix: String,
        #[arg(long = "attr")]
        attrs: Vec<String>,
    },

    /// Rename an entry in place.
    Rename {
        old_name: String,
        new_name: String,
        parent: String,
        prefix: String,
    },

    /// Add, replace, or delete individual attributes.
    ModAttrs {
        name: String,
        parent: String,
        prefix: String,
        #[arg(long = "attr")]
        attrs: Vec<String>,
        #[arg(long, value_enum)]
        op: AttrOp,
    },
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum AttrOp {
    Add,
    Replace,
    Delete,
}

impl From<AttrOp> for ModOp {
    fn from(op: AttrOp) -> Self {
        match op {
            AttrOp::Add => ModOp::Add,
            AttrOp::Replace => ModOp::Replace,
            AttrOp::Delete => ModOp::Delete,
        }
    }
}

/// Parses `--attr name=value` repeated flags into attribute modifications.
/// Multiple `--attr` flags with the same `name` collect into one
/// multi-valued attribute.
fn parse_attrs(raw: &[String]) -> Result<Vec<AttributeModification>> {
    let mut out: Vec<AttributeModification> = Vec::new();
    for entry in raw {
        let (name, value) = entry
            .split_once('=')
            .with_context(|| format!("'--attr {entry}' is not in 'name=value' form"))?;
        if let Some(existing) = out.iter_mut().find(|a| a.name == name) {
            existing.values.push(value.to_string());
        } else {
            out.push(AttributeModification::new(name, vec![value.to_string()]));
        }
    }
    Ok(out)
}

fn report(label: &str, result: OpResult) -> Result<()> {
    match result {
        OpResult::Success => {
            println!("{label}: ok");
            Ok(())
        }
        OpResult::Failure => anyhow::bail!("{label}: failed"),
    }
}

fn init_logger() {
    Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let settings = load_config(&cli.config)
        .with_context(|| format!("loading config {}", cli.config.display()))?;
    let mut session = Session::init(settings, LdapProtocol::new())?;
    session.install_default_handlers();
    session.exec();

    match cli.cmd {
        Cmd::Status => {
            println!("state: {:?}", session.state());
            Ok(())
        }
        Cmd::Add { name, parent, prefix, attrs } => {
            let attrs = parse_attrs(&attrs)?;
            report("add", session.add_entry(&name, &parent, &prefix, attrs))
        }
        Cmd::Del { name, parent, prefix } => {
            report("del", session.del_entry(&name, &parent, &prefix))
        }
        Cmd::Mod { name, parent, prefix, attrs } => {
            let attrs = parse_attrs(&attrs)?;
            report("mod", session.mod_entry(&name, &parent, &prefix, attrs))
        }
        Cmd::Rename { old_name, new_name, parent, prefix } => {
            report("rename", session.rename_entry(&old_name, &new_name, &parent, &prefix))
        }
        Cmd::ModAttrs { name, parent, prefix, attrs, op } => {
            let attrs = parse_attrs(&attrs)?;
            report("mod-attrs", session.mod_entry_attrs(&name, &parent, &prefix, attrs, op.into()))
        }
    }
}

fn main() {
    init_logger();

    if let Err(e) = run() {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

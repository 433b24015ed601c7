use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::json;

use specbundle::config::{CONFIG_FILE, SpecConfig};
use specbundle::merge::{MergeOptions, Resolution, Side};
use specbundle::model::{Bundle, PersonaName};
use specbundle::store::codec::Encoding;
use specbundle::store::now_unix_secs;
use specbundle::{locks, merge, telemetry};

/// Specification bundle tool
///
/// Inspects, verifies, migrates and merges specification bundles: a
/// directory of YAML/JSON artifacts (idea, business, product, features,
/// protocols) with a manifest holding per-file SHA-256 checksums, persona
/// ownership and section locks.
///
/// EXAMPLES:
///
///   specbundle detect ./spec
///   specbundle verify ./spec
///   specbundle migrate legacy.bundle.yaml ./spec
///   specbundle merge --base b --ours o --theirs t \
///       --ours-persona product-owner --theirs-persona architect --out merged
///   specbundle lock ./spec idea --persona product-owner
#[derive(Parser)]
#[command(name = "specbundle")]
#[command(version, about)]
#[command(propagate_version = true)]
#[command(after_help = "See 'specbundle <command> --help' for more information on a specific command.")]
struct Cli {
    /// Config file (missing file → defaults)
    #[arg(long, global = true, default_value = CONFIG_FILE, env = "SPECBUNDLE_CONFIG")]
    config: PathBuf,

    /// Print machine-readable JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Report which bundle layout is at a path
    Detect { path: PathBuf },

    /// Check every artifact against the manifest's checksums
    Verify { root: PathBuf },

    /// Load a bundle and summarize it
    Show {
        root: PathBuf,
        /// Skip checksum verification
        #[arg(long)]
        no_verify: bool,
    },

    /// Load a bundle in any layout and save it as a modular bundle
    Migrate {
        source: PathBuf,
        dest: PathBuf,
        /// Artifact encoding (default from config)
        #[arg(long, value_enum)]
        encoding: Option<EncodingArg>,
    },

    /// Three-way merge two edited bundles against their common base
    Merge {
        #[arg(long)]
        base: PathBuf,
        #[arg(long)]
        ours: PathBuf,
        #[arg(long)]
        theirs: PathBuf,
        #[arg(long)]
        ours_persona: PersonaName,
        #[arg(long)]
        theirs_persona: PersonaName,
        /// Where to save the merged bundle
        #[arg(long)]
        out: PathBuf,
        /// Side taken for conflicts nobody owns (default from config)
        #[arg(long, value_enum)]
        prefer: Option<SideArg>,
        /// Manual answer for one leaf path, e.g. `idea.title=theirs`
        #[arg(long = "resolve", value_name = "PATH=ours|theirs|base")]
        resolutions: Vec<String>,
    },

    /// Take the lock on a section
    Lock {
        root: PathBuf,
        section: String,
        #[arg(long)]
        persona: PersonaName,
    },

    /// Release the lock on a section, whoever holds it
    Unlock { root: PathBuf, section: String },

    /// List section locks
    Locks { root: PathBuf },
}

#[derive(Clone, Copy, ValueEnum)]
enum EncodingArg {
    Yaml,
    Json,
}

impl From<EncodingArg> for Encoding {
    fn from(arg: EncodingArg) -> Self {
        match arg {
            EncodingArg::Yaml => Self::Yaml,
            EncodingArg::Json => Self::Json,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum SideArg {
    Ours,
    Theirs,
}

impl From<SideArg> for Side {
    fn from(arg: SideArg) -> Self {
        match arg {
            SideArg::Ours => Self::Ours,
            SideArg::Theirs => Self::Theirs,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    telemetry::init();
    let config = SpecConfig::load(&cli.config)?;

    match cli.command {
        Commands::Detect { path } => detect(&path, cli.json),
        Commands::Verify { root } => verify(&config, &root, cli.json),
        Commands::Show { root, no_verify } => show(&config, &root, !no_verify, cli.json),
        Commands::Migrate {
            source,
            dest,
            encoding,
        } => migrate(&config, &source, &dest, encoding.map(Encoding::from), cli.json),
        Commands::Merge {
            base,
            ours,
            theirs,
            ours_persona,
            theirs_persona,
            out,
            prefer,
            resolutions,
        } => {
            let mut options = MergeOptions {
                fallback: prefer.map(Side::from).or_else(|| config.merge.fallback.side()),
                ..MergeOptions::default()
            };
            for spec in &resolutions {
                let (path, answer) = parse_resolution(spec)?;
                options.manual.insert(path, answer);
            }
            run_merge(
                &config,
                [&base, &ours, &theirs],
                [&ours_persona, &theirs_persona],
                &options,
                &out,
                cli.json,
            )
        }
        Commands::Lock {
            root,
            section,
            persona,
        } => lock(&config, &root, &section, &persona, cli.json),
        Commands::Unlock { root, section } => unlock(&config, &root, &section, cli.json),
        Commands::Locks { root } => list_locks(&config, &root, cli.json),
    }
}

fn load_bundle(config: &SpecConfig, root: &Path) -> Result<Bundle> {
    config
        .store()
        .load(root, config.store.validate_hashes)
        .with_context(|| format!("loading bundle {}", root.display()))
}

fn save_bundle(config: &SpecConfig, bundle: &mut Bundle, root: &Path) -> Result<()> {
    config
        .store()
        .save(bundle, root, config.store.atomic)
        .with_context(|| format!("saving bundle {}", root.display()))?;
    Ok(())
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

fn detect(path: &Path, as_json: bool) -> Result<()> {
    let detection = specbundle::detect_format(path);
    if as_json {
        return print_json(&json!({
            "format": detection.format.to_string(),
            "location": detection.location,
            "diagnostic": detection.diagnostic,
        }));
    }
    println!("{}", detection.format);
    if let Some(location) = &detection.location {
        println!("  location: {}", location.display());
    }
    if let Some(diagnostic) = &detection.diagnostic {
        println!("  note: {diagnostic}");
    }
    Ok(())
}

fn verify(config: &SpecConfig, root: &Path, as_json: bool) -> Result<()> {
    let mismatched = config
        .store()
        .verify(root)
        .with_context(|| format!("verifying bundle {}", root.display()))?;
    if as_json {
        print_json(&json!({ "root": root, "mismatched": mismatched }))?;
    } else if mismatched.is_empty() {
        println!("OK: every artifact matches the manifest");
    } else {
        println!("{} artifact(s) do not match the manifest:", mismatched.len());
        for path in &mismatched {
            println!("  - {}", path.display());
        }
    }
    if !mismatched.is_empty() {
        bail!("integrity check failed for {}", root.display());
    }
    Ok(())
}

fn show(config: &SpecConfig, root: &Path, validate: bool, as_json: bool) -> Result<()> {
    let bundle = config
        .store()
        .load(root, validate)
        .with_context(|| format!("loading bundle {}", root.display()))?;
    if as_json {
        return print_json(&json!({
            "schema_version": bundle.schema_version,
            "format": bundle.manifest.bundle.format.to_string(),
            "idea": bundle.idea.as_ref().map(|i| &i.title),
            "features": bundle.features.iter().map(|f| json!({
                "key": f.key.as_str(),
                "title": f.title,
                "stories": f.stories.len(),
            })).collect::<Vec<_>>(),
            "protocols": bundle.protocols.iter().map(|p| p.name.as_str()).collect::<Vec<_>>(),
            "personas": bundle.manifest.personas.keys().map(PersonaName::as_str).collect::<Vec<_>>(),
            "locks": bundle.manifest.locks,
        }));
    }

    println!(
        "bundle {} (schema {}, {})",
        root.display(),
        bundle.schema_version,
        bundle.manifest.bundle.format
    );
    if let Some(idea) = &bundle.idea {
        println!("  idea: {}", idea.title);
    }
    println!("  features: {}", bundle.features.len());
    for feature in &bundle.features {
        println!(
            "    {}  {} ({} stories)",
            feature.key,
            feature.title,
            feature.stories.len()
        );
    }
    println!("  protocols: {}", bundle.protocols.len());
    println!("  locks: {}", bundle.manifest.locks.len());
    Ok(())
}

fn migrate(
    config: &SpecConfig,
    source: &Path,
    dest: &Path,
    encoding: Option<Encoding>,
    as_json: bool,
) -> Result<()> {
    let mut bundle = load_bundle(config, source)?;
    let store = config
        .store()
        .with_encoding(encoding.unwrap_or(config.store.encoding));
    let report = store
        .save(&mut bundle, dest, config.store.atomic)
        .with_context(|| format!("saving bundle {}", dest.display()))?;
    if as_json {
        return print_json(&json!({
            "manifest": report.manifest,
            "files": report.files,
        }));
    }
    println!(
        "migrated {} → {} ({} files)",
        source.display(),
        dest.display(),
        report.files
    );
    Ok(())
}

fn parse_resolution(spec: &str) -> Result<(String, Resolution)> {
    let Some((path, answer)) = spec.rsplit_once('=') else {
        bail!("invalid --resolve '{spec}': expected PATH=ours|theirs|base");
    };
    let answer = match answer {
        "ours" => Resolution::Ours,
        "theirs" => Resolution::Theirs,
        "base" => Resolution::Base,
        other => bail!("invalid --resolve answer '{other}': expected ours, theirs or base"),
    };
    Ok((path.to_owned(), answer))
}

fn run_merge(
    config: &SpecConfig,
    [base, ours, theirs]: [&PathBuf; 3],
    [ours_persona, theirs_persona]: [&PersonaName; 2],
    options: &MergeOptions,
    out: &Path,
    as_json: bool,
) -> Result<()> {
    let base = load_bundle(config, base)?;
    let ours = load_bundle(config, ours)?;
    let theirs = load_bundle(config, theirs)?;

    let personas = if ours.manifest.personas.is_empty() {
        config.personas()
    } else {
        ours.manifest.personas.clone()
    };
    let mut result = merge::merge_with(
        &base,
        &ours,
        &theirs,
        &personas,
        ours_persona,
        theirs_persona,
        options,
    )
    .context("merging bundles")?;
    save_bundle(config, &mut result.merged, out)?;

    if as_json {
        print_json(&json!({
            "out": out,
            "auto_resolved": result.auto_resolved,
            "manually_resolved": result.manually_resolved,
            "fast_forwarded": result.fast_forwarded,
            "unresolved": result.unresolved,
            "conflicts": result.conflicts,
        }))?;
    } else {
        println!(
            "merged into {}: {} auto-resolved, {} manually resolved, {} fast-forwarded, {} unresolved",
            out.display(),
            result.auto_resolved,
            result.manually_resolved,
            result.fast_forwarded,
            result.unresolved
        );
        for conflict in &result.conflicts {
            println!("  CONFLICT {conflict}");
        }
        if !result.conflicts.is_empty() {
            println!(
                "  The merged bundle keeps the {ours_persona} value at each conflicting path.\n  To fix: rerun with --resolve PATH=ours|theirs|base or --prefer ours|theirs."
            );
        }
    }

    if !result.is_clean() {
        bail!("{} unresolved conflict(s)", result.unresolved);
    }
    Ok(())
}

fn lock(
    config: &SpecConfig,
    root: &Path,
    section: &str,
    persona: &PersonaName,
    as_json: bool,
) -> Result<()> {
    let mut bundle = load_bundle(config, root)?;
    if bundle.manifest.personas.is_empty() {
        bundle.manifest.personas = config.personas();
    }
    let held = locks::lock(&mut bundle.manifest, section, persona, now_unix_secs())?;
    save_bundle(config, &mut bundle, root)?;
    if as_json {
        return print_json(&json!(held));
    }
    println!("locked {} for {}", held.section, held.owner);
    Ok(())
}

fn unlock(config: &SpecConfig, root: &Path, section: &str, as_json: bool) -> Result<()> {
    let mut bundle = load_bundle(config, root)?;
    let removed = locks::unlock(&mut bundle.manifest, section);
    if removed.is_some() {
        save_bundle(config, &mut bundle, root)?;
    }
    if as_json {
        return print_json(&json!({ "removed": removed }));
    }
    match removed {
        Some(lock) => println!("unlocked {} (was held by {})", lock.section, lock.owner),
        None => println!("{section} was not locked"),
    }
    Ok(())
}

fn list_locks(config: &SpecConfig, root: &Path, as_json: bool) -> Result<()> {
    let bundle = load_bundle(config, root)?;
    if as_json {
        return print_json(&json!(bundle.manifest.locks));
    }
    if bundle.manifest.locks.is_empty() {
        println!("no locks");
    }
    for lock in &bundle.manifest.locks {
        println!("{}  {}  (since {})", lock.section, lock.owner, lock.locked_at);
    }
    Ok(())
}

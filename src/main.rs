use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use docfill::config::{init_default_config, Settings, CONFIG_ENV};
use docfill::fill::mapping::discover_labels;
use docfill::form::{output_file_name, resolve_template, FormInput};
use docfill::{
    fill_document_with, normalize_key, Document, FillOptions, LogoImage, LogoOptions, Mapping, Scope,
};

#[derive(Parser, Debug)]
#[command(name = "docfill")]
#[command(about = "Fill highlighted and bracketed placeholders in a .docx template", long_about = None)]
struct Args {
    /// Config file path (default: search for docfill.toml upwards)
    #[arg(long, global = true, env = CONFIG_ENV)]
    config: Option<PathBuf>,

    /// Debug logging (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fill a template and write the completed document
    Fill {
        /// Template .docx (default: [template] default_path from the config)
        #[arg(value_name = "DOCX")]
        template: Option<PathBuf>,

        /// Field value, repeatable
        #[arg(long = "set", value_name = "KEY=VALUE")]
        assignments: Vec<String>,

        /// JSON object file with field values
        #[arg(long, value_name = "JSON")]
        data: Option<PathBuf>,

        /// Extra fields as a JSON object string; ignored with a warning when invalid
        #[arg(long, value_name = "JSON")]
        extra: Option<String>,

        /// Fill every configured form field, empty when not given
        #[arg(long)]
        blank_missing: bool,

        /// Image placed at the logo marker
        #[arg(long, value_name = "IMAGE")]
        logo: Option<PathBuf>,

        /// Output .docx (default: <prefix>_<client>_<timestamp>.docx in the output dir)
        #[arg(short, long, value_name = "DOCX")]
        output: Option<PathBuf>,
    },
    /// List the highlighted labels and known fields found in a template
    Inspect {
        #[arg(value_name = "DOCX")]
        template: Option<PathBuf>,
    },
    /// Write a default docfill.toml, then exit
    InitConfig {
        /// Directory to write the config to (default: current directory)
        #[arg(long, value_name = "DIR")]
        dir: Option<PathBuf>,

        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match args.command {
        Command::InitConfig { dir, force } => {
            let dir = dir.unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
            let cfg_path = init_default_config(&dir, force).context("init default config")?;
            eprintln!("Wrote config: {}", cfg_path.display());
            Ok(())
        }
        Command::Inspect { template } => {
            let settings = Settings::load(args.config.as_deref())?;
            inspect(template.as_deref(), &settings)
        }
        Command::Fill {
            template,
            assignments,
            data,
            extra,
            blank_missing,
            logo,
            output,
        } => {
            let settings = Settings::load(args.config.as_deref())?;
            let form = FormInput {
                data_file: data,
                assignments,
                extra_json: extra,
                blank_missing,
            };
            fill(template.as_deref(), &form, logo.as_deref(), output, &settings)
        }
    }
}

fn fill(
    template: Option<&Path>,
    form: &FormInput,
    logo: Option<&Path>,
    output: Option<PathBuf>,
    settings: &Settings,
) -> anyhow::Result<()> {
    let template = resolve_template(template, settings)?;
    let collected = form.collect(settings)?;
    for w in &collected.warnings {
        eprintln!("warning: {w}; extra fields ignored");
    }

    let logo = logo
        .map(LogoImage::load)
        .transpose()
        .context("load logo image")?;
    let has_logo = logo.is_some();
    let opts = FillOptions {
        logo,
        logo_options: LogoOptions {
            marker: settings.logo_marker.clone(),
            width_mm: settings.logo_width_mm,
        },
    };

    let bytes = std::fs::read(&template)
        .with_context(|| format!("read template: {}", template.display()))?;
    let report = fill_document_with(&bytes, &collected.data, &opts)
        .with_context(|| format!("fill {}", template.display()))?;
    if has_logo && !report.logo_inserted {
        warn!(marker = %settings.logo_marker, "logo marker not found; no image inserted");
    }
    for label in &report.unmatched_labels {
        info!(label = %label, "highlighted label has no value");
    }

    let output = match output {
        Some(p) => p,
        None => {
            let mapping = Mapping::from_data(&collected.data);
            let client = mapping.get(&normalize_key(&settings.client_field));
            let name = output_file_name(&settings.filename_prefix, client, &chrono::Local::now());
            settings.output_dir.join(name)
        }
    };
    if let Some(dir) = output.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).with_context(|| format!("create output dir: {}", dir.display()))?;
    }
    std::fs::write(&output, &report.bytes)
        .with_context(|| format!("write output: {}", output.display()))?;
    info!(
        output = %output.display(),
        replacements = report.replacements,
        "document written"
    );
    println!("{}", output.display());
    Ok(())
}

fn inspect(template: Option<&Path>, settings: &Settings) -> anyhow::Result<()> {
    let template = resolve_template(template, settings)?;
    let bytes = std::fs::read(&template)
        .with_context(|| format!("read template: {}", template.display()))?;
    let doc = Document::open(&bytes)?;

    let labels = discover_labels(&doc);
    println!("Highlighted labels ({}):", labels.len());
    for label in &labels {
        println!("  {label}  ->  {}", normalize_key(label));
    }

    let texts: Vec<String> = doc
        .paragraphs(Scope::WithHeadersFooters)
        .map(|p| p.text())
        .collect();
    println!("Form fields:");
    for field in &settings.form_fields {
        let key = normalize_key(field);
        let found = !key.is_empty() && texts.iter().any(|t| t.contains(&key));
        println!("  {field}: {}", if found { "present" } else { "absent" });
    }
    let marker = texts.iter().any(|t| t.contains(&settings.logo_marker));
    println!(
        "Logo marker {}: {}",
        settings.logo_marker,
        if marker { "present" } else { "absent" }
    );
    Ok(())
}

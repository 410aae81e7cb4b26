mod cli;

use deckhand::config::EngineConfig;
use deckhand::documents::DocumentSet;
use deckhand::secrets::SecretSources;
use deckhand::{Document, Engine, RenderError};
use std::io::Write;

fn main() {
    use clap::Parser;
    let cli = cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_env("DECKHAND_LOG"))
        .with_writer(std::io::stderr)
        .init();

    for new_path in cli.directory.iter() {
        match new_path.canonicalize() {
            Err(e) => {
                eprintln!(
                    "Failed to resolve path for -C/--directory {}\n{}",
                    new_path.display(),
                    e
                );
                std::process::exit(1);
            }
            Ok(cwd) => {
                if let Err(err) = std::env::set_current_dir(&cwd) {
                    eprintln!("Failed to set work directory to {}\n{}", cwd.display(), err,);
                    std::process::exit(1);
                }

                tracing::info!(directory=%cwd.display(), "Changed working directory");
            }
        }
    }

    let command_result = load_config(cli.config.as_deref()).and_then(|config| match cli.command {
        cli::Command::Render(render_cli) => render(&config, render_cli),
        cli::Command::Validate(validate_cli) => validate(&config, validate_cli),
        cli::Command::Dev(dev_cli) => dev(&config, dev_cli),
    });

    if let Err(e) = command_result {
        for error in e.chain() {
            eprintln!("{error}")
        }
        if let Some(render_error) = e.downcast_ref::<RenderError>() {
            for message in render_error.validation_messages() {
                eprintln!("  {message}");
            }
        }
        std::process::exit(1);
    }
}

fn load_config(path: Option<&std::path::Path>) -> anyhow::Result<EngineConfig> {
    match path {
        Some(path) => Ok(EngineConfig::load(path)?),
        None => Ok(EngineConfig::default()),
    }
}

pub fn render(config: &EngineConfig, cli: cli::RenderCommand) -> anyhow::Result<()> {
    let documents = load(&cli.input)?.to_documents();
    let secrets = match &cli.secrets {
        Some(path) => load_secrets(path)?,
        None => SecretSources::new(),
    };

    let engine = Engine::new(config);
    let mut options = engine.default_options();
    options.permissive_missing_sources |= cli.permissive;
    options.post_validate &= !cli.no_post_validate;
    options.include_control |= cli.include_control;

    let rendered = engine.render(cli.revision, &documents, &secrets, &options)?;

    let rendered = if cli.cleartext_secrets {
        rendered.to_vec()
    } else {
        deckhand::scrub::redact_documents(&rendered, &documents)
    };

    output(&cli.output, &rendered)?;
    Ok(())
}

/// Pre-validation plus DataSchemas over every concrete document, as it is before rendering
pub fn validate(config: &EngineConfig, cli: cli::ValidateCommand) -> anyhow::Result<()> {
    let documents = load(&cli.input)?.to_documents();

    deckhand::validation::pre::pre_validate(&documents)?;

    let engine = Engine::new(config);
    let validator = engine.validator_for(&documents)?;
    let concrete: Vec<Document> = documents
        .iter()
        .filter(|document| !document.is_abstract() && !document.is_control())
        .cloned()
        .collect();
    deckhand::validation::post::post_validate(&concrete, &validator, &Default::default())?;

    eprintln!("{} documents valid", documents.len());
    Ok(())
}

fn load(input: &cli::InputArgs) -> anyhow::Result<DocumentSet> {
    let mut documents = DocumentSet::default();

    if !input.workdir && input.files.is_empty() && input.directories.is_empty() {
        let stdin = std::io::read_to_string(std::io::stdin())?;
        documents.insert_stream(&stdin, None)?;
        return Ok(documents);
    }

    if input.workdir {
        documents.load_directory(&std::env::current_dir()?)?;
    }

    for file_path in &input.files {
        documents.load_file(file_path)?;
    }

    for dir_path in &input.directories {
        documents.load_directory(dir_path)?;
    }

    anyhow::ensure!(documents.source_count() > 0, "No files loaded");

    Ok(documents)
}

fn load_secrets(path: &std::path::Path) -> anyhow::Result<SecretSources> {
    let contents = std::fs::read_to_string(path)?;
    let secrets: SecretSources = serde_yaml::from_str(&contents)?;
    tracing::info!(path = %path.display(), count = secrets.len(), "secrets loaded");
    Ok(secrets)
}

fn output(output: &cli::OutputArgs, documents: &[Document]) -> anyhow::Result<()> {
    let mut stdout = std::io::stdout().lock();

    match output.format {
        cli::OutputFormat::Yaml => {
            for document in documents {
                writeln!(stdout, "---")?;
                serde_yaml::to_writer(&mut stdout, document)?;
            }
        }
        cli::OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut stdout, documents)?;
            writeln!(stdout)?;
        }
    };

    Ok(())
}

/// (deckhand-)developer utilities
///
/// A quick way to expose internal structures for debugging purposes
pub fn dev(config: &EngineConfig, cli: cli::DevCommand) -> anyhow::Result<()> {
    use cli::DevSubCommand::*;

    let documents = load(&cli.input)?;

    match cli.command {
        Documents => println!("{documents:#?}"),
        Order => {
            let order = Engine::new(config).render_order(&documents.to_documents())?;
            for meta in order {
                println!("{meta}");
            }
        }
    }

    Ok(())
}

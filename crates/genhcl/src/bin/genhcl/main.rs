mod cli;

use genhcl::{EvalContext, FsConfigTree, GeneratedArtifact, ProjectPath, Stack, Vendoring};
use std::path::PathBuf;

/// Pending vendor requests a single run may queue up
const VENDOR_QUEUE_SIZE: usize = 64;

fn main() {
    use clap::Parser;
    let cli = cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_env("GENHCL_LOG"))
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

    let command_result = match cli.command {
        cli::Command::Generate(generate_cli) => generate(generate_cli),
        cli::Command::Dev(dev_cli) => dev(dev_cli),
    };

    if let Err(e) = command_result {
        for error in e.chain() {
            eprintln!("{error}")
        }
        std::process::exit(1);
    }
}

fn project(args: &cli::ProjectArgs) -> anyhow::Result<(FsConfigTree, Stack)> {
    let root = match &args.root {
        Some(root) => root.canonicalize()?,
        None => std::env::current_dir()?,
    };
    anyhow::ensure!(root.is_dir(), "project root {} is not a directory", root.display());

    let mut stack = Stack::new(ProjectPath::new(&args.stack));
    if let Some(path) = &args.repository_path {
        stack = stack.with_repository_path(ProjectPath::new(path));
    }
    Ok((FsConfigTree::new(root), stack))
}

pub fn generate(cli: cli::GenerateCommand) -> anyhow::Result<()> {
    let (tree, stack) = project(&cli.project)?;

    let mut globals = hcl::value::Map::new();
    for (name, expr) in &cli.globals {
        let parsed: hcl_edit::expr::Expression = expr.parse()?;
        let value = EvalContext::new().eval(&parsed.into())?;
        globals.insert(name.clone(), value);
    }
    let ctx = EvalContext::for_stack(&stack).with_globals(globals);

    let (requests, pending) = std::sync::mpsc::sync_channel(VENDOR_QUEUE_SIZE);
    let vendoring = Vendoring::new(ProjectPath::new(&cli.vendor_dir), Some(requests));

    let artifacts = genhcl::generate(&tree, &stack, &ctx, &vendoring)?;
    drop(vendoring);

    for request in pending.try_iter() {
        tracing::info!(
            source = %request.source,
            path = %request.source.vendor_path(&request.vendor_dir),
            "module needs vendoring"
        );
    }

    if cli.write {
        write(&stack.dir.host_path(tree.root()), &artifacts)
    } else {
        output(&cli.output, &artifacts)
    }
}

/// Persist applicable artifacts below `stack_dir`
fn write(stack_dir: &std::path::Path, artifacts: &[GeneratedArtifact]) -> anyhow::Result<()> {
    for artifact in artifacts {
        if !artifact.condition() || artifact.body().is_empty() {
            tracing::debug!(label = artifact.label(), "nothing to write");
            continue;
        }

        let path: PathBuf = stack_dir.join(artifact.label());
        if path.exists() {
            let existing = std::fs::read_to_string(&path)?;
            anyhow::ensure!(
                genhcl::generate::is_generated_code(&existing),
                "refusing to overwrite {}, it was not generated",
                path.display()
            );
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, artifact.file_contents())?;
        tracing::info!(path=%path.display(), "written");
    }

    Ok(())
}

fn output(output: &cli::OutputArgs, artifacts: &[GeneratedArtifact]) -> anyhow::Result<()> {
    match output.format {
        cli::OutputFormat::Yaml => serde_yaml::to_writer(std::io::stdout(), artifacts)?,
        cli::OutputFormat::Json => serde_json::to_writer_pretty(std::io::stdout(), artifacts)?,
    };

    Ok(())
}

/// (genhcl-)developer utilities
///
/// A quick way to expose internal structures for debugging purposes
pub fn dev(cli: cli::DevCommand) -> anyhow::Result<()> {
    use cli::DevSubCommand::*;

    match cli.command {
        Blocks(args) => {
            let (tree, stack) = project(&args)?;
            for block in genhcl::loader::load_blocks(&tree, &stack.dir)? {
                println!("{} ({})", block.describe(), block.range);
                println!("{block:#?}");
            }
        }
    }

    Ok(())
}

//! hierarchical discovery of generation blocks
use crate::config::{ConfigTree, GenerationBlock};
use crate::error::LoadError;
use crate::project::ProjectPath;

/// Collect the generation blocks visible from `dir`
///
/// Walks from `dir` up to the project root. Blocks of closer directories come before the ones of their ancestors,
/// within a directory the declaration order is kept. Nothing is filtered or evaluated here.
#[tracing::instrument(level = "debug", skip(tree))]
pub fn load_blocks(
    tree: &impl ConfigTree,
    dir: &ProjectPath,
) -> Result<Vec<GenerationBlock>, LoadError> {
    let mut blocks = vec![];
    let mut current = dir.clone();

    loop {
        if let Some(found) = tree.lookup(&current)? {
            tracing::debug!(dir=%current, count = found.len(), "found generation blocks");
            blocks.extend(found);
        }

        let parent = current.dir();
        if parent == current {
            break;
        }
        current = parent;
    }

    Ok(blocks)
}

//! # genhcl - hierarchical hcl code generation
//!
//! Generates configuration files for stacks from `generate_hcl` blocks declared anywhere between the project root
//! and the stack directory.
//!
//! ## Introduction for developers
//!
//! Read this to understand how `genhcl` works internally.
//!
//! ### Terms
//!
//! - a **stack** is a directory below the project root that configuration is generated for
//! - a **generation block** declares one artifact, named by its label
//! - the **content** of a generation block is the hcl body that ends up in the artifact
//!
//! ```hcl
//! generate_hcl "backend.tf" {
//!   condition = global.env != "dev"
//!
//!   lets {
//!     bucket = "state-${global.env}"
//!   }
//!
//!   content {
//!     terraform {
//!       backend "s3" {
//!         bucket = let.bucket
//!         key    = terramate.stack.path.absolute
//!       }
//!     }
//!   }
//! }
//! ```
//!
//! A file named `NAME.tmgen` is a shorthand for a generation block labeled `NAME` whose content is the whole file.
//!
//! ### Loading files
//!
//! Every directory is parsed into [hcl_documents::HclDocuments]. The source text is kept next to each parsed body so
//! spans can be turned into [source::SourceRange]s for user friendly error messages.
//!
//! [config::DirConfig::parse] then validates the `generate_hcl` blocks of a directory. Structural problems are
//! collected into [error::Diagnostics] so a single run reports all of them.
//!
//! [loader::load_blocks] walks from the stack directory up to the root and collects the blocks of every directory on
//! the way, nearest first. Where blocks come from is abstracted by [config::ConfigTree].
//!
//! ### Evaluation
//!
//! We use [hcl::eval] to evaluate expressions. [eval::EvalContext] owns the namespaces (`global`, `terramate`,
//! `let`, `tm_dynamic` iterators) and the functions of [stdlib]. It is copied whenever a new scope is entered.
//!
//! Content is **partially** evaluated: whatever refers to known namespaces is resolved, references to anything else
//! (`var.x`, `module.vpc.id`, ...) end up in the output as written.
//!
//! ### Generation
//!
//! see [generate::generate]
//!
//! [copy::Copier] rebuilds the content as an [hcl::Body], delegating `tm_dynamic` blocks to [dynamic]. The result is
//! formatted with [hcl::format] and returned as a [generate::GeneratedArtifact]. Writing artifacts is up to the caller.
//!
pub mod assert;
pub mod config;
pub mod copy;
pub mod dynamic;
pub mod error;
pub mod eval;
pub mod filter;
pub mod generate;
pub mod hcl_documents;
pub mod lets;
pub mod loader;
pub mod project;
pub mod source;
pub mod stdlib;
pub mod value;
pub mod vendor;
mod visit;

pub use config::{ConfigTree, FsConfigTree, GenerationBlock, MemoryConfigTree};
pub use error::{Diagnostic, Diagnostics, Error, ErrorKind, LoadError};
pub use eval::EvalContext;
pub use generate::{generate, CommentStyle, GeneratedArtifact};
pub use project::{ProjectPath, Stack};
pub use vendor::{VendorRequest, Vendoring};

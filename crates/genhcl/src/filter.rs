//! stack filters of generation blocks
use crate::project::{ProjectPath, Stack};
use glob::{MatchOptions, Pattern, PatternError};

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Compiled path glob
///
/// Patterns not starting with `/` match anywhere below the root.
#[derive(Debug, Clone, PartialEq)]
pub struct Glob {
    raw: String,
    pattern: Pattern,
}

impl Glob {
    pub fn new(raw: &str) -> Result<Self, PatternError> {
        let anchored = if raw.starts_with('/') {
            raw.to_string()
        } else {
            format!("/**/{raw}")
        };

        Ok(Self {
            raw: raw.to_string(),
            pattern: Pattern::new(&anchored)?,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn matches(&self, path: &ProjectPath) -> bool {
        self.pattern.matches_with(path.as_str(), MATCH_OPTIONS)
    }
}

/// A `stack_filter` block
///
/// Every glob set present has to match for the filter to match, within a set any glob is enough.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StackFilter {
    pub project_paths: Option<Vec<Glob>>,
    pub repository_paths: Option<Vec<Glob>>,
}

impl StackFilter {
    pub fn matches(&self, stack: &Stack) -> bool {
        let set_matches = |globs: &Option<Vec<Glob>>, path: &ProjectPath| match globs {
            Some(globs) => globs.iter().any(|glob| glob.matches(path)),
            None => true,
        };

        set_matches(&self.project_paths, &stack.dir)
            && set_matches(&self.repository_paths, &stack.repository_path)
    }
}

/// Whether a block with `filters` applies to `stack`
///
/// No filters match everything, otherwise any matching filter is enough.
pub fn matches(filters: &[StackFilter], stack: &Stack) -> bool {
    if filters.is_empty() {
        return true;
    }

    let matched = filters.iter().any(|filter| filter.matches(stack));
    tracing::trace!(stack=%stack.dir, matched, "stack filters evaluated");
    matched
}

#[cfg(test)]
mod test {
    use super::*;

    fn globs(patterns: &[&str]) -> Option<Vec<Glob>> {
        Some(
            patterns
                .iter()
                .map(|p| Glob::new(p).expect("valid glob"))
                .collect(),
        )
    }

    fn stack(path: &str) -> Stack {
        Stack::new(ProjectPath::new(path))
    }

    #[test]
    fn no_filters_match_everything() {
        assert!(matches(&[], &stack("/anything")));
    }

    #[test]
    fn absolute_and_relative_globs() {
        let absolute = Glob::new("/stacks/*").expect("valid glob");
        assert!(absolute.matches(&ProjectPath::new("/stacks/a")));
        assert!(!absolute.matches(&ProjectPath::new("/stacks/a/b")));
        assert!(!absolute.matches(&ProjectPath::new("/other/stacks/a")));

        let relative = Glob::new("prod").expect("valid glob");
        assert!(relative.matches(&ProjectPath::new("/stacks/prod")));
        assert!(relative.matches(&ProjectPath::new("/prod")));
        assert!(!relative.matches(&ProjectPath::new("/stacks/prod/vpc")));
    }

    #[test]
    fn disjunction_across_filters_conjunction_within() {
        let both = StackFilter {
            project_paths: globs(&["/stacks/**"]),
            repository_paths: globs(&["/nope/**"]),
        };
        assert!(!matches(std::slice::from_ref(&both), &stack("/stacks/a")));

        let project_only = StackFilter {
            project_paths: globs(&["/stacks/**"]),
            repository_paths: None,
        };
        assert!(matches(&[both, project_only], &stack("/stacks/a")));
    }

    #[test]
    fn repository_paths_use_the_repository_path() {
        let filter = StackFilter {
            project_paths: None,
            repository_paths: globs(&["/infra/**"]),
        };
        let stack = stack("/a").with_repository_path(ProjectPath::new("/infra/a"));
        assert!(matches(&[filter], &stack));
    }

    #[test]
    fn invalid_patterns_are_rejected() {
        assert!(Glob::new("/stacks/[").is_err());
    }
}

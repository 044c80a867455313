// Logging bootstrap for the notewise server
//
// Verbosity comes from the CLI flags; RUST_LOG overrides the preset
// directives unless quiet mode forces errors only. The presets keep
// per-statement noise (sqlx, hyper internals) below the retrieval and
// routing subsystems operators actually watch.

use tracing_subscriber::EnvFilter;

/// Log verbosity selected at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    Quiet,
    Normal,
    Verbose,
}

impl Verbosity {
    /// Resolve the CLI flags; quiet wins when both are passed
    pub fn from_flags(verbose: bool, quiet: bool) -> Self {
        if quiet {
            Self::Quiet
        } else if verbose {
            Self::Verbose
        } else {
            Self::Normal
        }
    }

    /// Filter directives for this level
    fn directives(self) -> &'static str {
        match self {
            Self::Quiet => "error",
            // Operational view: judge decisions, index progress, provider
            // registrations. sqlx statement logging stays capped.
            Self::Normal => "warn,notewise=info,sqlx=warn",
            // Debugging view: engine hit counts and SSE framing, plus
            // request traces from the HTTP layer
            Self::Verbose => "info,notewise=debug,tower_http=debug,sqlx=warn",
        }
    }
}

/// Install the global subscriber. Later calls keep the first subscriber,
/// which makes this safe under parallel test binaries.
pub fn init_logging(verbosity: Verbosity) {
    let filter = match (verbosity, std::env::var("RUST_LOG")) {
        (Verbosity::Quiet, _) => EnvFilter::new(Verbosity::Quiet.directives()),
        (_, Ok(custom)) => EnvFilter::new(custom),
        (level, Err(_)) => EnvFilter::new(level.directives()),
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(verbosity != Verbosity::Quiet)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quiet_wins_over_verbose() {
        assert_eq!(Verbosity::from_flags(true, true), Verbosity::Quiet);
        assert_eq!(Verbosity::from_flags(true, false), Verbosity::Verbose);
        assert_eq!(Verbosity::from_flags(false, false), Verbosity::Normal);
    }

    #[test]
    fn directives_scale_with_level() {
        assert_eq!(Verbosity::Quiet.directives(), "error");
        assert!(Verbosity::Normal.directives().contains("notewise=info"));
        assert!(Verbosity::Verbose.directives().contains("notewise=debug"));
        // statement spam stays capped at every non-quiet level
        assert!(Verbosity::Normal.directives().contains("sqlx=warn"));
        assert!(Verbosity::Verbose.directives().contains("sqlx=warn"));
    }

    #[test]
    fn repeated_init_keeps_first_subscriber() {
        init_logging(Verbosity::Normal);
        init_logging(Verbosity::Verbose);
        init_logging(Verbosity::Quiet);
    }
}

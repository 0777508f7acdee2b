use thiserror::Error;

/// The five fatal error kinds of the orchestration engine (spec.md §7).
///
/// Every kind is fatal at the rank that detects it: callers log the
/// error (via [`CoreError::log_and_abort`]) and terminate the process
/// rather than attempt recovery.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("invariant violation in task '{task}': {detail}")]
    InvariantViolation { task: String, detail: String },

    #[error("exchange error: {0}")]
    Exchange(String),

    #[error("channel '{name}' already exists with a different type")]
    ChannelTypeConflict { name: String },

    #[error("restart error: {0}")]
    Restart(String),
}

#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("duplicate name '{0}'")]
    DuplicateName(String),

    #[error("reserved or invalid name '{0}'")]
    ReservedName(String),

    #[error("unknown component '{0}' referenced")]
    UnknownComponent(String),

    #[error("bouncer '{bouncer}' bound to PV '{pv}' which has no registered integrator")]
    BouncerWithoutIntegrator { bouncer: String, pv: String },

    #[error("'{component}' expected a {expected} but '{got_name}' is a {got}")]
    WrongPvSubtype {
        component: String,
        expected: &'static str,
        got_name: String,
        got: &'static str,
    },

    #[error(
        "interactions '{a}' and '{b}' on ({pv1}, {pv2}) both declare writer channel '{channel}'"
    )]
    OverlappingWriterChannel {
        a: String,
        b: String,
        pv1: String,
        pv2: String,
        channel: String,
    },
}

pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    /// Log the failing task name, the component(s) involved, and the
    /// violated invariant, then abort the process. This is the single
    /// place the fatal-propagation policy of spec.md §7 is enforced.
    pub fn log_and_abort(&self, task_name: &str) -> ! {
        log::error!("task '{}' failed fatally: {}", task_name, self);
        std::process::exit(1);
    }
}

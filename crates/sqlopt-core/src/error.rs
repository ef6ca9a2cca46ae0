use thiserror::Error;

use crate::privilege::Privilege;

/// Canonical result for core and planner.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Planning error: {0}")]
    Plan(String),

    /// The external plan builder rejected its input.
    #[error("Plan build error: {0}")]
    Build(String),

    /// The statistics provider failed; retrying is the provider's business.
    #[error("Statistics error: {0}")]
    Stats(String),

    #[error("Hashing error: {0}")]
    Hash(String),

    #[error("Internal invariant failed: {0}")]
    Invariant(String),

    #[error("{privilege} command denied on {}", object_name(.db, .table, .column))]
    PrivilegeDenied {
        privilege: Privilege,
        db: String,
        table: String,
        column: String,
    },

    #[error("Cartesian product is unsupported")]
    CartesianProductUnsupported,

    #[error("Can't find a proper physical plan for this query: {0}")]
    NoPhysicalPlan(String),

    /// Error with context chain for better debugging
    #[error("Error in {context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

fn object_name(db: &str, table: &str, column: &str) -> String {
    let mut name = String::new();
    for part in [db, table, column] {
        if part.is_empty() {
            continue;
        }
        if !name.is_empty() {
            name.push('.');
        }
        name.push_str(part);
    }
    if name.is_empty() {
        "*".to_string()
    } else {
        format!("'{}'", name)
    }
}

impl Error {
    /// Add context to an error, creating an error chain.
    ///
    /// # Example
    /// ```rust,no_run
    /// use sqlopt_core::error::Error;
    /// let err = Error::Schema("unknown column".into());
    /// let err = err.with_context("logical rule 'column_prune'");
    /// ```
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Error::Context {
            context: context.into(),
            source: Box::new(self) as Box<dyn std::error::Error + Send + Sync>,
        }
    }

    /// The innermost core error below any context layers.
    pub fn root(&self) -> &Error {
        let mut cur = self;
        while let Error::Context { source, .. } = cur {
            match source.downcast_ref::<Error>() {
                Some(inner) => cur = inner,
                None => break,
            }
        }
        cur
    }

    /// The chain of context labels, outermost first.
    pub fn contexts(&self) -> Vec<&str> {
        let mut out = Vec::new();
        let mut cur = self;
        while let Error::Context { context, source } = cur {
            out.push(context.as_str());
            match source.downcast_ref::<Error>() {
                Some(inner) => cur = inner,
                None => break,
            }
        }
        out
    }

    /// Errors caused by the query plus configuration, reported verbatim to
    /// the end user. Everything else is a planner-internal failure.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self.root(),
            Error::PrivilegeDenied { .. } | Error::CartesianProductUnsupported
        )
    }

    /// Get suggestions for common errors.
    pub fn suggestions(&self) -> Vec<String> {
        match self.root() {
            Error::PrivilegeDenied {
                privilege,
                db,
                table,
                ..
            } => vec![
                format!("Ask an administrator to grant {} on {}", privilege, object_name(db, table, "")),
            ],
            Error::CartesianProductUnsupported => vec![
                "Add an equality condition between the joined tables".into(),
                "Or allow cartesian products in the optimizer configuration".into(),
            ],
            Error::Schema(msg) => {
                if msg.contains("unknown column") || msg.contains("column") {
                    vec![
                        "Check that the column name is spelled correctly".into(),
                        "Verify the column exists in the input schema".into(),
                    ]
                } else {
                    vec![]
                }
            }
            Error::Config(msg) => {
                if msg.contains("flag") {
                    vec!["Rule flags accept decimal, 0x-hex or 0b-binary masks below 256".into()]
                } else {
                    vec![]
                }
            }
            Error::NoPhysicalPlan(_) => {
                vec!["Check index hints: they may exclude every access path".into()]
            }
            _ => vec![],
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Hash(e.to_string())
    }
}

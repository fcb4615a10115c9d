use thiserror::Error;

/// Main error type for the GridSpan system
#[derive(Error, Debug)]
pub enum GsError {
    #[error("Search space error: {0}")]
    Search(#[from] SearchError),

    #[error("Dataset error: {0}")]
    Data(#[from] DataError),

    #[error("Worker pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("Execution error: {0}")]
    Exec(#[from] ExecError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

/// Search-space errors (malformed parameter grids)
#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Parameter grid is empty")]
    EmptyGrid,

    #[error("Parameter {parameter} has no candidate values")]
    EmptyAxis { parameter: String },

    #[error("Parameter grid has more than {max} combinations")]
    TooLarge { max: usize },

    #[error("Parameter {parameter} is missing from the candidate configuration")]
    MissingParameter { parameter: String },

    #[error("Parameter {parameter} has unexpected type: {message}")]
    ParameterType { parameter: String, message: String },
}

/// Dataset-related errors
#[derive(Error, Debug)]
pub enum DataError {
    #[error("Dataset is empty")]
    Empty,

    #[error("Dataset has only {rows} rows; at least {needed} required")]
    TooSmall { rows: usize, needed: usize },

    #[error("Feature row {row} has {got} columns, expected {expected}")]
    RaggedRow {
        row: usize,
        got: usize,
        expected: usize,
    },

    #[error("Feature matrix has {rows} rows but label vector has {labels}")]
    LabelMismatch { rows: usize, labels: usize },

    #[error("Invalid test fraction {fraction}: must be in (0, 1)")]
    InvalidSplit { fraction: f64 },

    #[error("Cannot build {folds} folds from {rows} rows")]
    FoldCount { folds: usize, rows: usize },

    #[error("Unknown broadcast dataset: {key}")]
    UnknownBroadcast { key: String },
}

/// Provisioning and pool-lifecycle errors
#[derive(Error, Debug)]
pub enum PoolError {
    #[error("Malformed resource spec: {message}")]
    MalformedSpec { message: String },

    #[error("Scheduler rejected the allocation request: {reason}")]
    SubmissionRejected { reason: String },

    #[error("Scheduler command failed: {message}")]
    Scheduler { message: String },

    #[error("Unknown job: {job_id}")]
    JobNotFound { job_id: String },

    #[error("No worker became reachable within {waited_secs} s")]
    Unavailable { waited_secs: u64 },

    #[error("Worker pool has been released")]
    Released,
}

/// Errors raised while executing a batch of tasks
#[derive(Error, Debug)]
pub enum ExecError {
    #[error("Task {task_index} ({task_id}) exhausted its retry budget after {attempts} attempts")]
    RetriesExhausted {
        task_index: usize,
        task_id: uuid::Uuid,
        attempts: usize,
    },

    #[error("Task {task_index} failed: {message}")]
    TaskFailed { task_index: usize, message: String },

    #[error("Operation exceeded its deadline after {elapsed_ms} ms")]
    DeadlineExceeded { elapsed_ms: u64 },

    #[error("Worker pool connection lost: {message}")]
    ConnectionLost { message: String },

    #[error("Could not decode task result: {message}")]
    ResultDecode { message: String },
}

/// Result type alias for GridSpan operations
pub type GsResult<T> = Result<T, GsError>;

/// Macro for creating validation errors
#[macro_export]
macro_rules! validation_error {
    ($($arg:tt)*) => {
        $crate::GsError::Validation(format!($($arg)*))
    };
}

/// Macro for creating internal errors
#[macro_export]
macro_rules! internal_error {
    ($($arg:tt)*) => {
        $crate::GsError::Internal(format!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = ExecError::RetriesExhausted {
            task_index: 7,
            task_id: uuid::Uuid::nil(),
            attempts: 3,
        };

        assert!(error.to_string().contains("Task 7"));
        assert!(error.to_string().contains("3 attempts"));
    }

    #[test]
    fn test_error_conversion() {
        let pool_error = PoolError::SubmissionRejected {
            reason: "quota exceeded".to_string(),
        };
        let gs_error: GsError = pool_error.into();

        match gs_error {
            GsError::Pool(_) => (),
            _ => panic!("Expected Pool error"),
        }
    }

    #[test]
    fn test_macros() {
        let _validation_err = validation_error!("Invalid value: {}", 42);
        let _internal_err = internal_error!("Something went wrong");
    }
}

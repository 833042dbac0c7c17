use snafu::Snafu;

#[derive(Debug, Snafu, PartialEq, Eq)]
pub enum NvmfError {
    #[snafu(display("nqn {} already exists", nqn))]
    AlreadyExists { nqn: String },
    #[snafu(display("subsystem {} not found", nqn))]
    NotFound { nqn: String },
    #[snafu(display("invalid listen address {:?}: {}", addr, reason))]
    InvalidAddress { addr: String, reason: String },
    #[snafu(display("subsystem {} is in Direct mode and cannot take virtual namespaces", nqn))]
    WrongMode { nqn: String },
    #[snafu(display("subsystem {} already has the maximum of {} namespaces", nqn, max))]
    NamespaceLimit { nqn: String, max: usize },
    #[snafu(display("{} out of range [{}, {}] (got {})", field, min, max, value))]
    OutOfRange {
        field: &'static str,
        min: u32,
        max: u32,
        value: u32,
    },
    #[snafu(display("{} must be a multiple of {} (got {})", field, multiple, value))]
    NotAMultiple {
        field: &'static str,
        multiple: u32,
        value: u32,
    },
}

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("Malformed smaps data: {0}")]
    Parse(String),

    #[error("Pagemap read failed: {0}")]
    TableRead(std::io::Error),

    #[error("Target has more than {0} memory mappings")]
    CapacityExceeded(usize),

    #[error("{0}")]
    StdIo(#[from] std::io::Error),
}

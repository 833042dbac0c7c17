use snafu::Snafu;

#[derive(Debug, Snafu)]
pub enum Ae4dmaError {
    #[snafu(display("descriptor ring for hw queue {} is full", hwq_id))]
    RingFull { hwq_id: usize },
    #[snafu(display("virt-to-phys translation failed: {}", source))]
    Translation { source: crate::core::dma::TranslationError },
    #[snafu(display("source and destination iovecs do not describe matching lengths"))]
    IovMismatch { source: crate::core::dma::IovIterError },
    #[snafu(display("hw queue id {} out of range (engine has {} queues)", hwq_id, count))]
    BadQueue { hwq_id: usize, count: usize },
}

impl From<crate::core::dma::IovIterError> for Ae4dmaError {
    fn from(source: crate::core::dma::IovIterError) -> Self {
        Ae4dmaError::IovMismatch {
            source,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io error binding demo socket: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection {0:?} is not present in the registry")]
    UnknownConnection(crate::registry::ConnId),
}

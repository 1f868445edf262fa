use async_trait::async_trait;
use fusion_core::SourceId;
use snafu::ResultExt;
use tokio::{io::AsyncRead, net::TcpStream};

use crate::error::{Result, error::ConnectSnafu};

pub type FeedReader = Box<dyn AsyncRead + Send + Unpin>;

/// An upstream feed that can be (re)connected to.
#[async_trait]
pub trait FeedSource: Send + Sync {
    fn source_id(&self) -> &SourceId;
    async fn connect(&self) -> Result<FeedReader>;
}

/// A feed that streams newline delimited JSON over a plain TCP connection.
#[derive(Debug, Clone)]
pub struct TcpFeed {
    source_id: SourceId,
    address: String,
}

impl TcpFeed {
    pub fn new(source_id: SourceId, address: String) -> Self {
        Self { source_id, address }
    }
}

#[async_trait]
impl FeedSource for TcpFeed {
    fn source_id(&self) -> &SourceId {
        &self.source_id
    }

    async fn connect(&self) -> Result<FeedReader> {
        let stream = TcpStream::connect(&self.address)
            .await
            .context(ConnectSnafu {
                address: &self.address,
            })?;

        Ok(Box::new(stream))
    }
}

//! `Git` gRPC service implementation.

use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status, Streaming};
use tracing::{Instrument, info, info_span, instrument, warn};

use gitgrpc_core::{FrameReader, FrameWriter};
use gitgrpc_proto::v1::Data;
use gitgrpc_proto::v1::git_server::Git;

use super::config::ServerConfig;
use crate::executor::SubprocessExecutor;
use crate::validate::ServiceValidator;

type DataStream = Pin<Box<dyn tokio_stream::Stream<Item = Result<Data, Status>> + Send>>;

/// Runs one backing command per `Connect` stream.
#[derive(Debug, Clone)]
pub struct GitServiceImpl {
    validator: Arc<ServiceValidator>,
    executor: SubprocessExecutor,
    channel_size: usize,
}

impl GitServiceImpl {
    pub fn new(validator: ServiceValidator, executor: SubprocessExecutor) -> Self {
        Self {
            validator: Arc::new(validator),
            executor,
            channel_size: ServerConfig::default().channel_size,
        }
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            validator: Arc::new(config.validator()),
            executor: config.executor(),
            channel_size: config.channel_size,
        }
    }
}

#[tonic::async_trait]
impl Git for GitServiceImpl {
    type ConnectStream = DataStream;

    #[instrument(skip(self, request), fields(rpc = "Connect"))]
    async fn connect(
        &self,
        request: Request<Streaming<Data>>,
    ) -> Result<Response<Self::ConnectStream>, Status> {
        // Nothing is spawned unless the request passes validation.
        let validated = self.validator.validate(request.metadata()).map_err(|e| {
            warn!(error = %e, "Rejected connect request");
            Status::from(e)
        })?;

        info!(
            service = %validated.service,
            repository = %validated.repository,
            "Connect accepted"
        );

        let in_stream = request.into_inner();
        let (out_tx, out_rx) = mpsc::channel::<Result<Data, Status>>(self.channel_size);
        let executor = self.executor;

        let span = info_span!(
            "git_session",
            service = %validated.service,
            repository = %validated.repository
        );
        tokio::spawn(
            async move {
                let input = FrameReader::new(in_stream);
                let output = FrameWriter::new(out_tx.clone());

                if let Err(e) = executor.run(&validated, input, output).await {
                    warn!(error = %e, "Session failed");
                    // Receiver dropped means the client is gone.
                    let _ = out_tx.send(Err(Status::from(e))).await;
                }
            }
            .instrument(span),
        );

        let out_stream = ReceiverStream::new(out_rx);
        Ok(Response::new(Box::pin(out_stream)))
    }
}

#![allow(dead_code)]

use chrono::{TimeZone, Utc};
use ferroid::{
    generator::{BasicSnowflakeGenerator, IdGenStatus},
    id::SnowflakeTwitterId,
    time::{MonotonicClock, TWITTER_EPOCH},
};
use missive_core::proto::{
    GenerateIdRequest, GenerateIdResponse,
    id_generator_server::{IdGenerator, IdGeneratorServer},
};
use missive_core::types::{ConversationId, Message, MessageId, MessageType, UserId};
use parking_lot::Mutex;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;
use tonic::{Request, Response, Status};

type Generator = BasicSnowflakeGenerator<SnowflakeTwitterId, MonotonicClock>;

/// Allocator backed by one Snowflake generator.
pub struct SnowflakeAllocator {
    generator: Mutex<Generator>,
}

impl SnowflakeAllocator {
    pub fn new(machine_id: u64) -> Self {
        let clock = MonotonicClock::with_epoch(TWITTER_EPOCH);
        Self {
            generator: Mutex::new(Generator::new(machine_id, clock)),
        }
    }
}

#[tonic::async_trait]
impl IdGenerator for SnowflakeAllocator {
    async fn generate_id(
        &self,
        _request: Request<GenerateIdRequest>,
    ) -> Result<Response<GenerateIdResponse>, Status> {
        loop {
            let status = self.generator.lock().try_next_id();
            match status {
                Ok(IdGenStatus::Ready { id }) => {
                    let id = i64::try_from(id.to_raw())
                        .map_err(|_| Status::internal("id overflowed 63 bits"))?;
                    return Ok(Response::new(GenerateIdResponse { id }));
                }
                Ok(IdGenStatus::Pending { .. }) => tokio::task::yield_now().await,
                Err(e) => return Err(Status::internal(e.to_string())),
            }
        }
    }
}

/// Always answers with the configured raw id.
pub struct FixedAllocator(pub i64);

#[tonic::async_trait]
impl IdGenerator for FixedAllocator {
    async fn generate_id(
        &self,
        _request: Request<GenerateIdRequest>,
    ) -> Result<Response<GenerateIdResponse>, Status> {
        Ok(Response::new(GenerateIdResponse { id: self.0 }))
    }
}

/// A tonic server on an ephemeral loopback port. Stops when dropped.
pub struct TestAllocator {
    pub addr: SocketAddr,
    shutdown: CancellationToken,
}

impl TestAllocator {
    pub async fn spawn<S: IdGenerator>(service: S) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = CancellationToken::new();

        let token = shutdown.clone();
        tokio::spawn(async move {
            Server::builder()
                .add_service(IdGeneratorServer::new(service))
                .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async move {
                    token.cancelled().await;
                })
                .await
                .unwrap();
        });

        Self { addr, shutdown }
    }

    pub async fn snowflake(machine_id: u64) -> Self {
        Self::spawn(SnowflakeAllocator::new(machine_id)).await
    }

    pub fn endpoint(&self) -> String {
        self.addr.to_string()
    }
}

impl Drop for TestAllocator {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// An address nothing listens on.
pub async fn unused_addr() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr.to_string()
}

pub fn message(id: u64, conversation: u64) -> Message {
    Message {
        id: MessageId::new(id).unwrap(),
        sender_id: UserId::new(1).unwrap(),
        receiver_id: ConversationId::new(conversation).unwrap(),
        content: format!("message {id}"),
        kind: MessageType::Text,
        created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        updated_at: None,
        deleted_at: None,
    }
}

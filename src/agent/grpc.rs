use super::{AgentConn, AgentFactory, CloneRequest};
use crate::constants::AGENT_PORT;
use crate::crd::MySQLCluster;
use crate::error::{HerdError, Result};
use async_trait::async_trait;
use http::uri::PathAndQuery;
use std::time::Duration;
use tonic::codec::ProstCodec;
use tonic::transport::{Channel, Endpoint};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(60);

const CLONE_PATH: &str = "/sqlherd.agent.Agent/Clone";

#[derive(Clone, PartialEq, prost::Message)]
pub struct CloneRequestMessage {
    #[prost(string, tag = "1")]
    pub host: String,
    #[prost(int32, tag = "2")]
    pub port: i32,
    #[prost(string, tag = "3")]
    pub user: String,
    #[prost(string, tag = "4")]
    pub password: String,
    #[prost(string, tag = "5")]
    pub init_user: String,
    #[prost(string, tag = "6")]
    pub init_password: String,
    #[prost(uint64, tag = "7")]
    pub boot_timeout_seconds: u64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct CloneResponseMessage {}

impl From<&CloneRequest> for CloneRequestMessage {
    fn from(req: &CloneRequest) -> Self {
        Self {
            host: req.host.clone(),
            port: i32::from(req.port),
            user: req.user.clone(),
            password: req.password.clone(),
            init_user: req.init_user.clone(),
            init_password: req.init_password.clone(),
            boot_timeout_seconds: req.boot_timeout.as_secs(),
        }
    }
}

/// Agent factory dialing `<pod hostname>:9080` over plaintext HTTP/2.
#[derive(Debug, Clone, Default)]
pub struct GrpcAgentFactory;

impl GrpcAgentFactory {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AgentFactory for GrpcAgentFactory {
    async fn connect(&self, cluster: &MySQLCluster, index: usize) -> Result<Box<dyn AgentConn>> {
        let uri = format!("http://{}:{}", cluster.pod_hostname(index), AGENT_PORT);
        let channel = Endpoint::from_shared(uri)?
            .connect_timeout(CONNECT_TIMEOUT)
            .http2_keep_alive_interval(KEEPALIVE_INTERVAL)
            .connect()
            .await?;
        Ok(Box::new(GrpcAgentConn { channel }))
    }
}

/// Open channel to one agent.
#[derive(Debug, Clone)]
pub struct GrpcAgentConn {
    channel: Channel,
}

#[async_trait]
impl AgentConn for GrpcAgentConn {
    async fn clone_from(&self, req: &CloneRequest) -> Result<()> {
        let mut client = tonic::client::Grpc::new(self.channel.clone());
        client
            .ready()
            .await
            .map_err(|e| HerdError::Agent(format!("agent not ready: {}", e)))?;

        let codec = ProstCodec::<CloneRequestMessage, CloneResponseMessage>::default();
        client
            .unary(
                tonic::Request::new(CloneRequestMessage::from(req)),
                PathAndQuery::from_static(CLONE_PATH),
                codec,
            )
            .await?;
        Ok(())
    }
}

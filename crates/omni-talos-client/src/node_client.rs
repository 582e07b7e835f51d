/*
 * Omni - fleet management control plane
 * Copyright (C) 2025 Omni contributors
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published
 * by the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 */

//! Typed async client for the node agent gRPC API (spec §6): maintenance
//! mode connects with insecure TLS straight to `ManagementAddress`;
//! normal mode uses the cluster's `TalosConfig` PKI bundle against one of
//! its endpoints.

use std::sync::Arc;
use std::time::Duration;

use hyper_util::rt::TokioIo;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use tonic::transport::{Channel, Endpoint};

use crate::error::{ClientError, Result};
use crate::pb::machine_service_client::MachineServiceClient;
use futures::StreamExt;

use crate::pb::{
    ApplyConfigurationRequest, ApplyMode, EtcdForfeitLeadershipRequest, EtcdLeaveClusterRequest,
    EtcdMemberListRequest, ImagePullRequest as PbImagePullRequest, ListImagesRequest,
    MetaDeleteRequest, MetaWriteRequest, ResetRequest, SchematicInfoRequest, UpgradeRequest,
    VersionRequest, WipePartition,
};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// PKI bundle and endpoints for a cluster's Talos API (spec §3's
/// `TalosConfig` resource).
#[derive(Clone)]
pub struct TalosConfig {
    pub ca_pem: Vec<u8>,
    pub crt_pem: Vec<u8>,
    pub key_pem: Vec<u8>,
    pub endpoints: Vec<String>,
}

/// A connected node agent client. Cheap to clone (wraps a `tonic::Channel`,
/// which multiplexes over a single HTTP/2 connection).
#[derive(Clone)]
pub struct NodeClient {
    inner: MachineServiceClient<Channel>,
}

impl NodeClient {
    /// Connects insecurely (no server cert verification) directly to a
    /// machine's maintenance-mode management address.
    pub async fn connect_maintenance(management_address: &str) -> Result<Self> {
        let _ = rustls::crypto::ring::default_provider().install_default();
        let tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(rustls::RootCertStore::empty())
            .with_no_client_auth();
        let channel = connect_with_tls(management_address, tls_config, true, None).await?;
        Ok(Self {
            inner: MachineServiceClient::new(channel),
        })
    }

    /// Connects with mTLS using the cluster's `TalosConfig` PKI bundle,
    /// against the first reachable endpoint.
    pub async fn connect(config: &TalosConfig) -> Result<Self> {
        let _ = rustls::crypto::ring::default_provider().install_default();

        let mut root_store = rustls::RootCertStore::empty();
        for cert in load_pem_certs(&config.ca_pem)? {
            root_store
                .add(cert)
                .map_err(|e| ClientError::Config(format!("invalid CA certificate: {e}")))?;
        }
        let client_certs = load_pem_certs(&config.crt_pem)?;
        let client_key = load_pem_key(&config.key_pem)?;
        let tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_client_auth_cert(client_certs, client_key)
            .map_err(|e| ClientError::Config(format!("invalid client certificate: {e}")))?;

        let endpoint = config
            .endpoints
            .first()
            .ok_or_else(|| ClientError::Config("TalosConfig has no endpoints".into()))?;
        let channel = connect_with_tls(endpoint, tls_config, false, None).await?;
        Ok(Self {
            inner: MachineServiceClient::new(channel),
        })
    }

    pub async fn version(&mut self) -> Result<String> {
        let resp = self.inner.version(VersionRequest {}).await?;
        Ok(resp.into_inner().tag)
    }

    pub async fn apply_configuration(&mut self, data: Vec<u8>, mode: ApplyMode) -> Result<ApplyMode> {
        let resp = self
            .inner
            .apply_configuration(ApplyConfigurationRequest {
                data,
                mode: mode as i32,
            })
            .await?;
        Ok(ApplyMode::try_from(resp.into_inner().mode).unwrap_or(ApplyMode::Auto))
    }

    pub async fn upgrade(&mut self, image: String, preserve: bool, stage: bool, force: bool) -> Result<()> {
        self.inner
            .upgrade(UpgradeRequest {
                image,
                preserve,
                stage,
                force,
            })
            .await?;
        Ok(())
    }

    pub async fn reset(&mut self, graceful: bool, reboot: bool, partitions: Vec<(String, bool)>) -> Result<()> {
        self.inner
            .reset_generic(ResetRequest {
                graceful,
                reboot,
                system_partitions_to_wipe: partitions
                    .into_iter()
                    .map(|(label, wipe)| WipePartition { label, wipe })
                    .collect(),
            })
            .await?;
        Ok(())
    }

    pub async fn etcd_forfeit_leadership(&mut self) -> Result<()> {
        self.inner
            .etcd_forfeit_leadership(EtcdForfeitLeadershipRequest {})
            .await?;
        Ok(())
    }

    pub async fn etcd_leave_cluster(&mut self) -> Result<()> {
        self.inner.etcd_leave_cluster(EtcdLeaveClusterRequest {}).await?;
        Ok(())
    }

    /// Best-effort meta delete; callers should treat `NotFound`,
    /// `Unimplemented`, and `FailedPrecondition` as success (spec §4.1.7).
    pub async fn meta_delete(&mut self, key: u32) -> Result<()> {
        self.inner.meta_delete(MetaDeleteRequest { key }).await?;
        Ok(())
    }

    pub async fn meta_write(&mut self, key: u32, value: Vec<u8>) -> Result<()> {
        self.inner.meta_write(MetaWriteRequest { key, value }).await?;
        Ok(())
    }

    /// Reads the currently-applied schematic, flagging invalid/legacy
    /// schematics the image factory no longer recognizes (spec §4.1.1
    /// step 7).
    pub async fn schematic_info(&mut self) -> Result<SchematicInfo> {
        let resp = self.inner.schematic_info(SchematicInfoRequest {}).await?.into_inner();
        Ok(SchematicInfo {
            id: resp.id,
            full_id: resp.full_id,
            invalid: resp.invalid,
        })
    }

    /// Lists image references already present on the node (spec §4.7
    /// image-pull task: "lists existing images per node").
    pub async fn list_images(&mut self) -> Result<Vec<String>> {
        let mut stream = self.inner.list_images(ListImagesRequest {}).await?.into_inner();
        let mut names = Vec::new();
        while let Some(item) = stream.next().await {
            names.push(item?.name);
        }
        Ok(names)
    }

    /// Pulls a single image reference. `Unimplemented` is tolerated by
    /// callers (spec §4.7: "tolerates Unimplemented").
    pub async fn pull_image(&mut self, image: String) -> Result<()> {
        self.inner.image_pull(PbImagePullRequest { name: image }).await?;
        Ok(())
    }

    /// Returns this node's view of the etcd member list, used by the
    /// identity collector task (spec §4.7).
    pub async fn etcd_member_list(&mut self) -> Result<Vec<String>> {
        let resp = self.inner.etcd_member_list(EtcdMemberListRequest {}).await?;
        Ok(resp.into_inner().member_ids)
    }
}

#[derive(Debug, Clone)]
pub struct SchematicInfo {
    pub id: String,
    pub full_id: String,
    pub invalid: bool,
}

struct NoVerifier;

impl rustls::client::danger::ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

async fn connect_with_tls(
    address: &str,
    mut tls_config: rustls::ClientConfig,
    skip_verification: bool,
    request_timeout: Option<Duration>,
) -> Result<Channel> {
    if skip_verification {
        tls_config
            .dangerous()
            .set_certificate_verifier(Arc::new(NoVerifier));
    }
    tls_config.alpn_protocols = vec![b"h2".to_vec()];
    let tls_config = Arc::new(tls_config);
    let connector = tokio_rustls::TlsConnector::from(tls_config);

    let endpoint_url = if address.starts_with("http") {
        address.to_string()
    } else {
        format!("https://{address}")
    };
    let parsed = url::Url::parse(&endpoint_url)
        .map_err(|e| ClientError::Config(format!("invalid node address {address}: {e}")))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| ClientError::Config(format!("node address {address} has no host")))?
        .to_string();
    let port = parsed.port().unwrap_or(50000);

    let mut endpoint = Endpoint::from_shared(format!("http://{host}:{port}"))
        .map_err(|e| ClientError::Config(e.to_string()))?
        .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
        .timeout(request_timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT));
    endpoint = endpoint.http2_keep_alive_interval(Duration::from_secs(30));

    let channel = endpoint
        .connect_with_connector(tower::service_fn(move |uri: tonic::transport::Uri| {
            let connector = connector.clone();
            let host = host.clone();
            async move {
                let uri_host = uri.host().unwrap_or("127.0.0.1");
                let uri_port = uri.port_u16().unwrap_or(50000);
                let tcp = tokio::net::TcpStream::connect(format!("{uri_host}:{uri_port}")).await?;
                let server_name = ServerName::try_from(host)
                    .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
                let tls_stream = connector.connect(server_name, tcp).await?;
                Ok::<_, std::io::Error>(TokioIo::new(tls_stream))
            }
        }))
        .await?;
    Ok(channel)
}

fn load_pem_certs(pem: &[u8]) -> Result<Vec<CertificateDer<'static>>> {
    let mut reader = std::io::BufReader::new(pem);
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| ClientError::Config(format!("failed to parse PEM certificates: {e}")))?;
    if certs.is_empty() {
        return Err(ClientError::Config("no certificates found in PEM data".into()));
    }
    Ok(certs)
}

fn load_pem_key(pem: &[u8]) -> Result<PrivateKeyDer<'static>> {
    let mut reader = std::io::BufReader::new(pem);
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| ClientError::Config(format!("failed to parse PEM private key: {e}")))?
        .ok_or_else(|| ClientError::Config("no private key found in PEM data".into()))
}

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

//! Image pull task (spec §4.7): one instance per `ImagePullRequest`.
//! Lists the images already present on every requested node and issues
//! `PullImage` only for the ones missing, reporting `(currentNum,
//! totalNum, node, image, error)` progress as it goes. Nodes whose
//! maintenance image service doesn't implement `ListImages` are treated
//! as having nothing cached, not as an error (spec §4.7 "tolerates
//! Unimplemented").
//!
//! `TaskRunner` restarts a task immediately (no backoff) when
//! `run_task` returns `Ok(())`, so a finished one-shot request parks on
//! `cancel.cancelled()` instead of returning, and only exits for real
//! once the request is torn down and the task set is reconciled away.

use std::sync::Arc;

use async_trait::async_trait;
use omni_resources::{Kind, Metadata, TypedStore};
use omni_runtime::TaskSpec;
use omni_talos_client::ClientError;
use tokio_util::sync::CancellationToken;
use tracing::{instrument, warn};

use crate::clients::TalosClients;
use omni_resources::{ImagePullRequestSpec, ImagePullStatusSpec};

pub struct ImagePullTask {
    pub request_id: String,
    pub request: ImagePullRequestSpec,
    /// Management address for each requested node, in the same order as
    /// `request.nodes`.
    pub management_addresses: Vec<String>,
    pub status: TypedStore<ImagePullStatusSpec>,
    pub clients: Arc<TalosClients>,
}

#[async_trait]
impl TaskSpec for ImagePullTask {
    fn id(&self) -> String {
        format!("image-pull/{}", self.request_id)
    }

    fn fingerprint(&self) -> String {
        let mut key = self.request.nodes.join(",");
        key.push('|');
        key.push_str(&self.request.images.join(","));
        key
    }

    #[instrument(skip(self, cancel), fields(request = %self.request_id))]
    async fn run_task(&self, cancel: CancellationToken) -> anyhow::Result<()> {
        self.run_once().await;
        cancel.cancelled().await;
        Ok(())
    }
}

impl ImagePullTask {
    async fn run_once(&self) {
        let total_num = (self.request.nodes.len() * self.request.images.len()) as u32;
        let mut current_num = 0u32;

        for (node, address) in self.request.nodes.iter().zip(self.management_addresses.iter()) {
            let mut client = match self.clients.maintenance(address).await {
                Ok(client) => client,
                Err(e) => {
                    for image in &self.request.images {
                        current_num += 1;
                        self.report(current_num, total_num, node, image, Some(e.to_string()));
                    }
                    continue;
                }
            };

            let present = match client.list_images().await {
                Ok(images) => images,
                Err(e) if e.is_benign_on_upgrade() => Vec::new(),
                Err(e) => {
                    warn!(node = %node, error = %e, "failed to list existing images");
                    Vec::new()
                }
            };

            for image in &self.request.images {
                current_num += 1;
                if present.contains(image) {
                    self.report(current_num, total_num, node, image, None);
                    continue;
                }
                let outcome = client.pull_image(image.clone()).await;
                let error = self.pull_error(outcome);
                self.report(current_num, total_num, node, image, error);
            }
        }
    }

    fn pull_error(&self, outcome: Result<(), ClientError>) -> Option<String> {
        match outcome {
            Ok(()) => None,
            Err(e) if e.is_benign_on_upgrade() => None,
            Err(e) => Some(e.to_string()),
        }
    }

    fn report(&self, current_num: u32, total_num: u32, node: &str, image: &str, error: Option<String>) {
        let id = format!("{}/{}/{}", self.request_id, node, image);
        let spec = ImagePullStatusSpec {
            current_num,
            total_num,
            node: node.to_string(),
            image: image.to_string(),
            error,
        };
        let result = match self.status.try_get(&id) {
            Ok(Some((meta, _))) => self.status.update(&id, meta.version, spec, |_| {}).map(|_| ()),
            Ok(None) => {
                let meta = Metadata::new("default", ImagePullStatusSpec::KIND, id.clone());
                self.status.create(meta, spec).map(|_| ())
            }
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            warn!(node = %node, image = %image, error = %e, "failed to report image pull progress");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn fingerprint_is_stable_for_same_request_shape() {
        let task = ImagePullTask {
            request_id: "r1".into(),
            request: ImagePullRequestSpec {
                nodes: vec!["n1".into(), "n2".into()],
                images: vec!["img:1".into()],
            },
            management_addresses: vec!["10.0.0.1:50000".into(), "10.0.0.2:50000".into()],
            status: TypedStore::new(omni_resources::InMemoryStore::new(), "default", "ImagePullStatus"),
            clients: Arc::new(TalosClients::new(8, Duration::from_secs(60))),
        };
        assert_eq!(task.fingerprint(), "n1,n2|img:1");
        assert_eq!(task.id(), "image-pull/r1");
    }
}

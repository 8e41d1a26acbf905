//! [`SignalBus`] over the relay: every client connected to the same relay
//! shares one bus.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::application::ports::SignalBus;
use crate::domain::relay::RelayMsg;
use crate::domain::signal::{BusNotification, SignalKey};

use super::client::RelayClient;

pub struct RelaySignalBus {
    client: Arc<RelayClient>,
}

impl RelaySignalBus {
    pub fn new(client: Arc<RelayClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SignalBus for RelaySignalBus {
    async fn write(&self, key: SignalKey, value: String) -> anyhow::Result<()> {
        self.client
            .send(&RelayMsg::BusWrite {
                key: key.as_str().to_owned(),
                value: Some(value),
            })
            .await
    }

    fn notifications(&self) -> anyhow::Result<mpsc::UnboundedReceiver<BusNotification>> {
        self.client.take_bus_notifications()
    }
}

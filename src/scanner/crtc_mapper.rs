use std::collections::HashMap;

use crate::kms::{ConnectorDesc, KmsOps};

/// Assigns CRTCs to connectors during a discovery pass.
pub trait CrtcMapper {
    fn map<'a, K, I>(&mut self, kms: &K, connectors: I)
    where
        K: KmsOps,
        K::ModeId: 'a,
        I: Iterator<Item = &'a ConnectorDesc<K::ModeId>>;

    fn crtc_for_connector(&self, connector: u32) -> Option<u32>;
}

/// First-fit mapper: a connector keeps the CRTC its current encoder already
/// drives when no earlier connector claimed it, otherwise it takes the first
/// unclaimed CRTC any of its encoders can reach.
#[derive(Default)]
pub struct SimpleCrtcMapper {
    crtcs: HashMap<u32, u32>,
}

impl SimpleCrtcMapper {
    pub fn new() -> Self {
        Self::default()
    }

    fn is_taken(&self, crtc: u32) -> bool {
        self.crtcs.values().any(|claimed| *claimed == crtc)
    }

    fn restored_for_connector<K: KmsOps>(
        &self,
        kms: &K,
        connector: &ConnectorDesc<K::ModeId>,
    ) -> Option<u32> {
        let encoder = kms.encoder(connector.current_encoder?).ok()?;
        let crtc = encoder.crtc?;
        (!self.is_taken(crtc)).then_some(crtc)
    }

    fn next_available_for_connector<K: KmsOps>(
        &self,
        kms: &K,
        connector: &ConnectorDesc<K::ModeId>,
    ) -> Option<u32> {
        connector
            .encoders
            .iter()
            .filter_map(|id| kms.encoder(*id).ok())
            .find_map(|encoder| {
                encoder
                    .possible_crtcs
                    .into_iter()
                    .find(|crtc| !self.is_taken(*crtc))
            })
    }
}

impl CrtcMapper for SimpleCrtcMapper {
    fn map<'a, K, I>(&mut self, kms: &K, connectors: I)
    where
        K: KmsOps,
        K::ModeId: 'a,
        I: Iterator<Item = &'a ConnectorDesc<K::ModeId>>,
    {
        for connector in connectors {
            let crtc = self
                .restored_for_connector(kms, connector)
                .or_else(|| self.next_available_for_connector(kms, connector));

            if let Some(crtc) = crtc {
                self.crtcs.insert(connector.id, crtc);
            }
        }
    }

    fn crtc_for_connector(&self, connector: u32) -> Option<u32> {
        self.crtcs.get(&connector).copied()
    }
}

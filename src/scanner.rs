//! Connector scan: build the list of (connector, CRTC, mode) tuples the
//! device can bind to.

use crate::error::{Error, Result};
use crate::kms::KmsOps;

mod crtc_mapper;
pub use crtc_mapper::{CrtcMapper, SimpleCrtcMapper};

/// One bindable output: a connected connector, the CRTC assigned to it, and
/// its native default mode. Immutable once discovered.
#[derive(Clone, Copy, Debug)]
pub struct ModeInfo<M> {
    pub connector: u32,
    pub crtc: u32,
    pub width: u32,
    pub height: u32,
    pub native: M,
}

/// Walk every connector once. Unconnected connectors and connectors without
/// modes are skipped; only the first advertised mode of each connector is
/// taken (the native default). Connectors for which no free CRTC remains are
/// dropped with a diagnostic.
pub fn discover<K: KmsOps>(kms: &K) -> Result<Vec<ModeInfo<K::ModeId>>> {
    let connectors = kms.connectors().map_err(Error::Kernel)?;

    let mut mapper = SimpleCrtcMapper::new();
    mapper.map(
        kms,
        connectors
            .iter()
            .filter(|conn| conn.connected && !conn.modes.is_empty()),
    );

    let mut modes = Vec::new();
    for connector in &connectors {
        if !connector.connected {
            tracing::debug!("ignoring unused connector {}", connector.id);
            continue;
        }
        let Some(mode) = connector.modes.first() else {
            tracing::debug!("no valid mode for connector {}", connector.id);
            continue;
        };
        let Some(crtc) = mapper.crtc_for_connector(connector.id) else {
            tracing::warn!("cannot find suitable CRTC for connector {}", connector.id);
            continue;
        };

        tracing::debug!(
            "mode #{}: {}x{}, conn: {}, crtc: {}",
            modes.len(),
            mode.width,
            mode.height,
            connector.id,
            crtc,
        );
        modes.push(ModeInfo {
            connector: connector.id,
            crtc,
            width: mode.width,
            height: mode.height,
            native: mode.native,
        });
    }

    if modes.is_empty() {
        return Err(Error::NoConnectedDisplay);
    }
    Ok(modes)
}

/// First entry, in discovery order, large enough to hold the requested size.
pub fn first_fit<M>(modes: &[ModeInfo<M>], width: u32, height: u32) -> Option<&ModeInfo<M>> {
    modes
        .iter()
        .find(|mode| mode.width >= width && mode.height >= height)
}

//! Fixture advertisements modelled on real receivers

use std::collections::HashMap;

use connect_discovery::Advertisement;
use zeroconf_client::DeviceInfo;

/// A receiver as it appears on the network plus what its getInfo returns
#[derive(Debug, Clone)]
pub struct ReceiverFixture {
    pub advertisement: Advertisement,
    pub info: Option<DeviceInfo>,
}

impl ReceiverFixture {
    pub fn new(instance: &str, ip: &str, port: u16, txt: &[(&str, &str)]) -> Self {
        Self {
            advertisement: Advertisement {
                instance_name: instance.to_string(),
                addresses: vec![ip.parse().expect("fixture ip")],
                port,
                txt: txt
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect::<HashMap<_, _>>(),
            },
            info: None,
        }
    }

    pub fn with_info(mut self, remote_name: Option<&str>, display_name: Option<&str>) -> Self {
        self.info = Some(DeviceInfo {
            remote_name: remote_name.map(str::to_string),
            display_name: display_name.map(str::to_string),
            ..Default::default()
        });
        self
    }
}

/// AV receiver whose mDNS instance carries a MAC-derived suffix
pub fn av_receiver() -> ReceiverFixture {
    ReceiverFixture::new(
        "AVR-X2700H-0005cd123456",
        "192.168.1.50",
        4070,
        &[("CPath", "/zc"), ("VERSION", "1.0"), ("FriendlyName", "Denon AVR")],
    )
    .with_info(Some("Living Room"), Some("Denon AVR-X2700H"))
}

/// Smart speaker with no getInfo answer (asleep)
pub fn sleeping_speaker() -> ReceiverFixture {
    ReceiverFixture::new(
        "Bedroom Speaker (Spotify)",
        "192.168.1.51",
        8080,
        &[("CPath", "spotifyconnect/zeroconf/")],
    )
}

/// Streamer advertising only a `fn` key
pub fn streamer() -> ReceiverFixture {
    ReceiverFixture::new(
        "streamer_a1b2c3d4e5f6",
        "192.168.1.52",
        80,
        &[("fn", "Office")],
    )
}

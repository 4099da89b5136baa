mod common;

use common::{device, test_config, FakeCard};
use galena::kms::EncoderDesc;
use galena::{Error, VideoDevice};

#[test]
fn discovery_keeps_connector_order() {
    let dev = device(&[(1280, 720), (1920, 1080)], false);
    let modes = dev.modes();
    assert_eq!(modes.len(), 2);
    assert_eq!((modes[0].width, modes[0].height), (1280, 720));
    assert_eq!((modes[1].width, modes[1].height), (1920, 1080));
    assert_eq!(modes[0].crtc, 200);
    assert_eq!(modes[1].crtc, 201);
}

#[test]
fn first_fit_picks_first_large_enough_entry() {
    let mut dev = device(&[(1280, 720), (1920, 1080)], false);

    // both modes could hold 640x480; discovery order wins
    dev.bind_mode(640, 480).unwrap();
    let real = dev.real_surface().unwrap();
    assert_eq!((real.width, real.height), (1280, 720));

    // only the second mode can hold full HD
    dev.bind_mode(1920, 1080).unwrap();
    let real = dev.real_surface().unwrap();
    assert_eq!((real.width, real.height), (1920, 1080));
}

#[test]
fn oversized_request_fails_and_keeps_binding() {
    let mut dev = device(&[(1280, 720), (1920, 1080)], false);
    dev.bind_mode(1920, 1080).unwrap();
    let fbs = dev.kms().live_fbs();
    let dumb = dev.kms().live_dumb();
    let commits = dev.kms().commits().len();

    let err = dev.bind_mode(3000, 2000).unwrap_err();
    assert!(matches!(
        err,
        Error::NoSuitableMode {
            width: 3000,
            height: 2000
        }
    ));

    // prior binding untouched, nothing allocated or committed
    assert!(dev.is_bound());
    let real = dev.real_surface().unwrap();
    assert_eq!((real.width, real.height), (1920, 1080));
    assert_eq!(dev.kms().live_fbs(), fbs);
    assert_eq!(dev.kms().live_dumb(), dumb);
    assert_eq!(dev.kms().commits().len(), commits);
}

#[test]
fn unconnected_connectors_are_ignored() {
    let mut card = FakeCard::with_outputs(&[(800, 600), (1024, 768)]);
    card.connectors[0].connected = false;
    let dev = VideoDevice::with_kms(card, test_config(false)).unwrap();
    let modes = dev.modes();
    assert_eq!(modes.len(), 1);
    assert_eq!((modes[0].width, modes[0].height), (1024, 768));
}

#[test]
fn no_connected_display_is_fatal() {
    let mut card = FakeCard::with_outputs(&[(800, 600)]);
    card.connectors[0].connected = false;
    let err = VideoDevice::with_kms(card, test_config(false))
        .err()
        .expect("probe must fail");
    assert!(matches!(err, Error::NoConnectedDisplay));
}

#[test]
fn connector_without_free_crtc_is_dropped() {
    // both connectors can only reach CRTC 200
    let mut card = FakeCard::with_outputs(&[(800, 600), (1024, 768)]);
    card.encoders.insert(
        101,
        EncoderDesc {
            id: 101,
            crtc: None,
            possible_crtcs: vec![200],
        },
    );
    card.crtc_ids = vec![200];
    let dev = VideoDevice::with_kms(card, test_config(false)).unwrap();
    let modes = dev.modes();
    assert_eq!(modes.len(), 1);
    assert_eq!(modes[0].connector, 1);
}

#[test]
fn crtc_restore_precedence_over_free_search() {
    // both connectors' current encoders drive CRTC 201; the first connector
    // keeps it, the second falls back to the first free CRTC
    let mut card = FakeCard::with_outputs(&[(800, 600), (1024, 768)]);
    card.encoders.insert(
        100,
        EncoderDesc {
            id: 100,
            crtc: Some(201),
            possible_crtcs: vec![200, 201],
        },
    );
    card.encoders.insert(
        101,
        EncoderDesc {
            id: 101,
            crtc: Some(201),
            possible_crtcs: vec![200, 201],
        },
    );
    let dev = VideoDevice::with_kms(card, test_config(false)).unwrap();
    let modes = dev.modes();
    assert_eq!(modes[0].crtc, 201);
    assert_eq!(modes[1].crtc, 200);
}

#[test]
fn missing_dumb_support_without_accel_is_fatal() {
    let card = FakeCard::with_outputs(&[(800, 600)]);
    card.has_dumb.set(false);
    let err = VideoDevice::with_kms(card, test_config(false))
        .err()
        .expect("probe must fail");
    assert!(matches!(err, Error::CapabilityMissing));
}

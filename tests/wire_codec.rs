// MIT License - Copyright (c) 2021 TJForc
// AlertMe XBee bridge
//
// Byte-level tests of the XBee API codec against hand-assembled frames.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use alertme_xbee_bridge::transport::codec::checksum;
use alertme_xbee_bridge::{
    generate, Addr16, Addr64, ApiMode, MessageParams, OutboundFrame, RawFrame, XBeeCodec,
};

/// Frame `frame_data` for API mode 2, escaping by hand.
fn escaped_frame(frame_data: &[u8]) -> Vec<u8> {
    let mut body = (frame_data.len() as u16).to_be_bytes().to_vec();
    body.extend_from_slice(frame_data);
    body.push(checksum(frame_data));

    let mut raw = vec![0x7E];
    for byte in body {
        if matches!(byte, 0x7E | 0x7D | 0x11 | 0x13) {
            raw.extend_from_slice(&[0x7D, byte ^ 0x20]);
        } else {
            raw.push(byte);
        }
    }
    raw
}

/// Explicit RX indicator from a SmartPlug reporting its relay on.
fn switch_response_data() -> Vec<u8> {
    let mut data = vec![0x91];
    data.extend_from_slice(&[0x00, 0x0D, 0x6F, 0x00, 0x02, 0x73, 0x95, 0xA2]);
    data.extend_from_slice(&[0x11, 0x7D]); // remote16 that needs escaping
    data.extend_from_slice(&[0x02, 0x02, 0x00, 0xEE, 0xC2, 0x16, 0x01]);
    data.extend_from_slice(&[0x09, 0x68, 0x80, 0x07, 0x01]);
    data
}

#[test]
fn test_decode_escaped_explicit_rx_after_noise() {
    let mut codec = XBeeCodec::new(ApiMode::Escaped);
    let mut buf = BytesMut::from(&[0x00, 0x13, 0x42][..]);
    buf.extend_from_slice(&escaped_frame(&switch_response_data()));

    let Some(RawFrame::ExplicitRx(rx)) = codec.decode(&mut buf).unwrap() else {
        panic!("expected explicit rx");
    };
    assert_eq!(rx.remote64, Some(Addr64::new(0x000D_6F00_0273_95A2)));
    assert_eq!(rx.remote16, Some(Addr16::new(0x117D)));
    assert_eq!(rx.cluster_id, 0x00EE);
    assert_eq!(rx.profile_id, 0xC216);
    assert_eq!(rx.payload, vec![0x09, 0x68, 0x80, 0x07, 0x01]);
    assert!(buf.is_empty());
}

#[test]
fn test_decode_split_across_reads() {
    let mut codec = XBeeCodec::new(ApiMode::Escaped);
    let raw = escaped_frame(&[0x88, 0x01, b'M', b'Y', 0x00, 0x00, 0x00]);
    let (first, second) = raw.split_at(5);

    let mut buf = BytesMut::from(first);
    assert_eq!(codec.decode(&mut buf).unwrap(), None);
    buf.extend_from_slice(second);
    assert_eq!(
        codec.decode(&mut buf).unwrap(),
        Some(RawFrame::AtResponse {
            frame_id: 1,
            command: "MY".to_string(),
            status: 0,
            data: vec![0x00, 0x00],
        })
    );
}

#[test]
fn test_bad_checksum_dropped_next_frame_kept() {
    let mut codec = XBeeCodec::new(ApiMode::Unescaped);
    let mut corrupt = escaped_frame(&[0x8B, 0x05, 0x47, 0x8E, 0x00, 0x00, 0x00]);
    let last = corrupt.len() - 1;
    corrupt[last] ^= 0x01;

    let mut buf = BytesMut::from(&corrupt[..]);
    buf.extend_from_slice(&escaped_frame(&[0x8B, 0x06, 0x47, 0x8E, 0x00, 0x00, 0x00]));
    match codec.decode(&mut buf).unwrap() {
        Some(RawFrame::TxStatus { frame_id, remote16, .. }) => {
            assert_eq!(frame_id, 6);
            assert_eq!(remote16, Addr16::new(0x478E));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_encode_explicit_tx() {
    let message = generate("versionInfoRequest", &MessageParams::default()).unwrap();
    let mut frame = OutboundFrame::explicit(Addr64::new(0x000D_6F00_0354_CBAD), Addr16::new(0x478E), message);
    frame.set_frame_id(0x13);

    let mut codec = XBeeCodec::new(ApiMode::Escaped);
    let mut buf = BytesMut::new();
    codec.encode(&frame, &mut buf).unwrap();

    assert_eq!(buf[0], 0x7E);
    // Frame type 0x11 and frame id 0x13 are both escaped on the wire
    assert_eq!(&buf[3..7], &[0x7D, 0x31, 0x7D, 0x33]);
    assert_eq!(buf.to_vec(), escaped_frame(&frame.to_frame_data()));

    // Mode 1 writes frame data verbatim
    let mut plain_codec = XBeeCodec::new(ApiMode::Unescaped);
    let mut plain = BytesMut::new();
    plain_codec.encode(&frame, &mut plain).unwrap();
    assert_eq!(&plain[3..plain.len() - 1], &frame.to_frame_data()[..]);
}

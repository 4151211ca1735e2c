use bytes::Bytes;

use crate::error::Error;
use crate::header::Header;

#[test]
fn test_unmarshal_full_header() -> Result<(), Error> {
    let raw_pkt: &[u8] = &[
        0x91, 0xe0, 0x69, 0x8f, 0xd9, 0xc2, 0x93, 0xda, 0x1c, 0x64, 0x27, 0x82, 0x00, 0x00, 0x00,
        0x01, 0x00, 0x01, 0x00, 0x01, 0xFF, 0xFF, 0xFF, 0xFF,
    ];

    let want = Header {
        version: 2,
        padding: false,
        extension: true,
        marker: true,
        payload_type: 96,
        sequence_number: 27023,
        timestamp: 3653407706,
        ssrc: 476325762,
        csrc: vec![1],
        extension_profile: 1,
        extension_payload: Bytes::from_static(&[0xFF, 0xFF, 0xFF, 0xFF]),
    };

    let mut buf = raw_pkt;
    let header = Header::unmarshal(&mut buf)?;
    assert_eq!(header, want, "unmarshal: got {header:#?}, want {want:#?}");
    assert_eq!(buf.len(), 0, "cursor must stop at the payload");
    assert_eq!(header.marshal_size(), raw_pkt.len());

    let mut out = Vec::with_capacity(header.marshal_size());
    let n = header.marshal_to(&mut out)?;
    assert_eq!(n, raw_pkt.len());
    assert_eq!(out, raw_pkt, "marshal must reproduce the wire bytes");

    Ok(())
}

#[test]
fn test_unmarshal_too_short() {
    let raw_pkt: &[u8] = &[0x80, 0x00, 0x00, 0x01];
    let mut buf = raw_pkt;
    assert_eq!(
        Header::unmarshal(&mut buf),
        Err(Error::ErrHeaderSizeInsufficient)
    );
}

#[test]
fn test_unmarshal_rejects_bad_version() {
    // Version 1 in the top two bits.
    let raw_pkt: &[u8] = &[
        0x40, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01,
    ];
    let mut buf = raw_pkt;
    assert_eq!(Header::unmarshal(&mut buf), Err(Error::ErrBadVersion(1)));
}

#[test]
fn test_unmarshal_truncated_csrc_list() {
    // cc says 2 CSRCs but only one is present.
    let raw_pkt: &[u8] = &[
        0x82, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0xde, 0xad, 0xbe,
        0xef,
    ];
    let mut buf = raw_pkt;
    assert_eq!(
        Header::unmarshal(&mut buf),
        Err(Error::ErrHeaderSizeInsufficient)
    );
}

#[test]
fn test_unmarshal_truncated_extension() {
    // Extension bit set, declared length of one word, nothing behind it.
    let raw_pkt: &[u8] = &[
        0x90, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0xbe, 0xde, 0x00,
        0x01,
    ];
    let mut buf = raw_pkt;
    assert_eq!(
        Header::unmarshal(&mut buf),
        Err(Error::ErrHeaderSizeInsufficientForExtension)
    );
}

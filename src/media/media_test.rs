use super::raw_writer::RawWriter;
use super::*;

fn packet(payload: &'static [u8]) -> Packet {
    Packet {
        header: rtp::header::Header {
            version: 2,
            marker: true,
            payload_type: 0,
            sequence_number: 4242,
            timestamp: 160_000,
            ssrc: 0xdeadbeef,
            ..Default::default()
        },
        payload: Bytes::from_static(payload),
    }
}

#[test]
fn test_codec_from_mime_type() {
    assert_eq!(Codec::from_mime_type("audio/opus"), Some(Codec::opus()));
    assert_eq!(Codec::from_mime_type("audio/OPUS"), Some(Codec::opus()));
    assert_eq!(Codec::from_mime_type("audio/PCMU"), Some(Codec::Pcmu));
    assert_eq!(Codec::from_mime_type("audio/pcma"), Some(Codec::Pcma));
    assert_eq!(Codec::from_mime_type("video/VP8"), None);
    assert_eq!(Codec::from_mime_type("audio/G722"), None);
}

#[test]
fn test_codec_extension() {
    for codec in [Codec::opus(), Codec::Pcmu, Codec::Pcma] {
        assert_eq!(Codec::from_extension(codec.extension()), Some(codec));
    }
    assert_eq!(Codec::from_extension("wav"), None);
}

#[test]
fn test_silence_frame_keeps_timing() {
    let pkt = packet(&[0x10, 0x20, 0x30, 0x40]);

    let opus = Codec::opus().silence_frame(&pkt);
    assert_eq!(opus.header.sequence_number, 4242);
    assert_eq!(opus.header.timestamp, 160_000);
    assert_eq!(opus.header.ssrc, 0xdeadbeef);
    assert_eq!(&opus.payload[..], &[0xf8, 0xff, 0xfe]);

    let pcmu = Codec::Pcmu.silence_frame(&pkt);
    assert_eq!(pcmu.header.sequence_number, 4242);
    assert_eq!(&pcmu.payload[..], &[0xff; 4]);

    let pcma = Codec::Pcma.silence_frame(&pkt);
    assert_eq!(pcma.header.ssrc, 0xdeadbeef);
    assert_eq!(&pcma.payload[..], &[0xd5; 4]);
}

#[test]
fn test_raw_writer_writes_payload_only() -> Result<()> {
    let mut buf = vec![];
    {
        let mut w = RawWriter::new(&mut buf);
        w.write_rtp(&packet(&[1, 2, 3]))?;
        w.write_rtp(&packet(&[4, 5]))?;
        assert_eq!(w.bytes_written(), 5);
        w.close()?;
        w.close()?;
        assert!(w.write_rtp(&packet(&[6])).is_err());
    }
    assert_eq!(buf, vec![1, 2, 3, 4, 5]);
    Ok(())
}

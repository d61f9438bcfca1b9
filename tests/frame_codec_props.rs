//! # Frame Codec Properties
//!
//! However a length-prefixed stream is chopped into reads, the decoder
//! yields exactly the frames that were written, in order.

use bytes::{Bytes, BytesMut};
use proptest::prelude::*;
use tokio_util::codec::{Decoder, Encoder};

use channel_gateway::socket::FrameCodec;

fn encode_all(frames: &[Vec<u8>]) -> Vec<u8> {
    let mut codec = FrameCodec::new();
    let mut wire = BytesMut::new();
    for frame in frames {
        codec
            .encode(Bytes::copy_from_slice(frame), &mut wire)
            .unwrap();
    }
    wire.to_vec()
}

/// Feeds `wire` into the decoder in chunks cut at `cuts` and collects every frame
fn decode_in_chunks(wire: &[u8], cuts: &[usize]) -> Vec<Vec<u8>> {
    let mut points: Vec<usize> = cuts.iter().map(|c| c % (wire.len() + 1)).collect();
    points.push(0);
    points.push(wire.len());
    points.sort_unstable();
    points.dedup();

    let mut codec = FrameCodec::new();
    let mut buf = BytesMut::new();
    let mut out = Vec::new();
    for window in points.windows(2) {
        buf.extend_from_slice(&wire[window[0]..window[1]]);
        while let Some(frame) = codec.decode(&mut buf).unwrap() {
            out.push(frame.to_vec());
        }
    }
    assert!(buf.is_empty());
    out
}

proptest! {
    #[test]
    fn single_frame_survives_any_split(
        body in proptest::collection::vec(any::<u8>(), 0..2048),
        cuts in proptest::collection::vec(any::<usize>(), 0..16),
    ) {
        let frames = vec![body];
        let wire = encode_all(&frames);
        prop_assert_eq!(decode_in_chunks(&wire, &cuts), frames);
    }

    #[test]
    fn back_to_back_frames_stay_ordered(
        frames in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 0..256), 1..6),
        cuts in proptest::collection::vec(any::<usize>(), 0..24),
    ) {
        let wire = encode_all(&frames);
        prop_assert_eq!(decode_in_chunks(&wire, &cuts), frames);
    }
}

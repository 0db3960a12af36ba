//! Frame codec tests.

#[cfg(test)]
mod tests {
    use crate::block::TableId;
    use crate::snapshot::{FrameType, SnapFrame, SnapshotError};

    fn sample() -> SnapFrame {
        SnapFrame {
            ftype: FrameType::Data,
            table: TableId { suid: 3, uid: 30 },
            body: vec![9, 8, 7],
        }
    }

    /// # Scenario
    /// A frame round-trips through its wire encoding and the header's
    /// size field counts table id plus body.
    #[test]
    fn frames_round_trip() {
        let frame = sample();
        let bytes = frame.encode().unwrap();

        assert_eq!(bytes[0], 1);
        let size = u32::from_le_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);
        assert_eq!(size as usize, 16 + frame.body.len());
        assert_eq!(bytes.len(), 5 + size as usize);

        let decoded = SnapFrame::decode(&bytes).unwrap();
        assert_eq!(decoded, frame);

        let del = SnapFrame {
            ftype: FrameType::Del,
            ..sample()
        };
        let decoded = SnapFrame::decode(&del.encode().unwrap()).unwrap();
        assert_eq!(decoded.ftype, FrameType::Del);
    }

    /// # Scenario
    /// An empty body is legal at the codec layer — the minimum frame is
    /// header plus table id.
    #[test]
    fn empty_body_round_trips() {
        let frame = SnapFrame {
            body: Vec::new(),
            ..sample()
        };
        let bytes = frame.encode().unwrap();
        assert_eq!(bytes.len(), 21);
        assert_eq!(SnapFrame::decode(&bytes).unwrap(), frame);
    }

    /// # Scenario
    /// Truncated buffers, unknown type tags, and size mismatches in
    /// either direction are all malformed.
    #[test]
    fn rejects_malformed_frames() {
        let bytes = sample().encode().unwrap();

        let err = SnapFrame::decode(&bytes[..10]).unwrap_err();
        assert!(matches!(err, SnapshotError::MalformedFrame(_)));

        let mut bad_type = bytes.clone();
        bad_type[0] = 3;
        let err = SnapFrame::decode(&bad_type).unwrap_err();
        assert!(matches!(err, SnapshotError::MalformedFrame(_)));

        let err = SnapFrame::decode(&bytes[..bytes.len() - 1]).unwrap_err();
        assert!(matches!(err, SnapshotError::MalformedFrame(_)));

        let mut extended = bytes.clone();
        extended.push(0);
        let err = SnapFrame::decode(&extended).unwrap_err();
        assert!(matches!(err, SnapshotError::MalformedFrame(_)));
    }
}

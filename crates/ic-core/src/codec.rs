//! Handshake wire codec: version sniffing plus postcard encode/decode.
//!
//! Versions are sniffed by decoding just the leading `VersionProbe` field
//! before committing to a full envelope decode. `postcard::take_from_bytes`
//! stops after the fields of `VersionProbe` and hands back the unconsumed
//! tail, so sniffing never requires buffering or re-parsing the full
//! message twice from scratch.

use serde::{Deserialize, Serialize};

use crate::envelope::{HandshakeRequest, HandshakeResponse, VersionProbe};
use crate::error::Error;

/// Sniff the envelope version without committing to a full decode.
///
/// Any parse failure, or a version `< 1`, is a fatal envelope error. Version
/// 1 is recognized (so the caller can refuse it) but never decoded further;
/// this crate implements only the `>= 2` shape.
pub fn sniff_version(bytes: &[u8]) -> Result<u32, Error> {
    let (probe, _rest): (VersionProbe, _) = postcard::take_from_bytes(bytes)?;
    if probe.version < 1 {
        return Err(Error::UnsupportedVersion(probe.version));
    }
    Ok(probe.version)
}

/// Encode any envelope as postcard bytes.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, Error> {
    Ok(postcard::to_allocvec(value)?)
}

/// Decode postcard bytes as any envelope type.
pub fn decode<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T, Error> {
    Ok(postcard::from_bytes(bytes)?)
}

/// Decode a v2 handshake request, rejecting anything below version 2.
pub fn decode_request_v2(bytes: &[u8]) -> Result<HandshakeRequest, Error> {
    let version = sniff_version(bytes)?;
    if version < 2 {
        return Err(Error::UnsupportedVersion(version));
    }
    decode(bytes)
}

/// Decode a v2 handshake response.
pub fn decode_response_v2(bytes: &[u8]) -> Result<HandshakeResponse, Error> {
    decode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::Header;

    fn sample_request() -> HandshakeRequest {
        HandshakeRequest {
            version: 2,
            requester_rank: 1,
            supported_algos: Vec::new(),
            ops: Vec::new(),
            protocol_families: Vec::new(),
            io_param: Vec::new(),
        }
    }

    #[test]
    fn round_trip_request() {
        let req = sample_request();
        let bytes = encode(&req).unwrap();
        let decoded: HandshakeRequest = decode(&bytes).unwrap();
        assert_eq!(decoded.version, req.version);
        assert_eq!(decoded.requester_rank, req.requester_rank);
    }

    #[test]
    fn sniff_version_reads_leading_field_only() {
        let req = sample_request();
        let bytes = encode(&req).unwrap();
        assert_eq!(sniff_version(&bytes).unwrap(), 2);
    }

    #[test]
    fn decode_request_v2_rejects_v1() {
        let mut req = sample_request();
        req.version = 1;
        let bytes = encode(&req).unwrap();
        assert!(matches!(
            decode_request_v2(&bytes),
            Err(Error::UnsupportedVersion(1))
        ));
    }

    #[test]
    fn decode_response_round_trips() {
        let resp = HandshakeResponse {
            header: Header::ok(),
            algo: None,
            algo_param: Vec::new(),
            ops: Vec::new(),
            protocol_families: Vec::new(),
            io_param: Vec::new(),
        };
        let bytes = encode(&resp).unwrap();
        let decoded = decode_response_v2(&bytes).unwrap();
        assert!(decoded.header.code.is_ok());
    }
}

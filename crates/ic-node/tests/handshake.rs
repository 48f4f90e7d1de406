//! End-to-end handshake scenarios.

use ic_core::params::lr::{FieldType, LastBatchPolicy, OptimizerKind, ShardSerializeFormat, SigmoidMode, SsProtocolKind, TruncMode};
use ic_core::params::psi::{CurveType, HashToCurveStrategy, HashType, PointOctetFormat};
use ic_node::handlers::lr::LrHandler;
use ic_node::handlers::psi::PsiHandler;
use ic_node::state_machine::{run_handshake, AlgoHandler, NegotiatedContext, RunError};
use ic_transport::InMemoryMesh;

fn psi_handler(rank: i32, result_to_rank: Option<i32>, item_num: i64) -> PsiHandler {
    PsiHandler {
        local_rank: rank,
        suite: ic_core::params::psi::EcSuite {
            curve: CurveType::Curve25519,
            hash: HashType::Sha256,
            hash2curve: HashToCurveStrategy::DirectHashAsPointX,
        },
        point_octet_format: PointOctetFormat::Uncompressed,
        support_point_truncation: false,
        item_num,
        result_to_rank,
    }
}

#[allow(clippy::too_many_arguments)]
fn lr_handler(rank: i32, world_size: i32, has_label: bool, feature_num: i32, sample_size: i64, l2_norm: f64) -> LrHandler {
    LrHandler {
        local_rank: rank,
        world_size,
        sample_size,
        feature_num,
        has_label,
        last_batch_policy: LastBatchPolicy::Discard,
        l0_norm: 0.0,
        l1_norm: 0.0,
        l2_norm,
        learning_rate: 1e-4,
        sigmoid_mode: SigmoidMode::Real,
        optimizer: OptimizerKind::Sgd,
        ss_protocol: SsProtocolKind::Semi2k,
        field_type: FieldType::Ring64,
        fxp_bits: 18,
        shard_format: ShardSerializeFormat::Raw,
        trunc_mode: TruncMode::Probabilistic,
        num_epoch: 3,
        batch_size: 20,
        use_ttp: false,
        ttp_server_host: String::new(),
        ttp_session_id: String::new(),
        ttp_adjust_rank: 0,
    }
}

#[tokio::test]
async fn scenario_a_two_party_psi_ok() {
    let mesh = InMemoryMesh::new(2);
    let h0 = AlgoHandler::Psi(psi_handler(0, None, 100));
    let h1 = AlgoHandler::Psi(psi_handler(1, None, 100));

    let t0 = mesh.party(0);
    let t1 = mesh.party(1);
    let (r0, r1) = tokio::join!(run_handshake(&t0, 2, &h0), run_handshake(&t1, 2, &h1));

    let NegotiatedContext::Psi(ctx0) = r0.unwrap() else { panic!("expected PSI context") };
    let NegotiatedContext::Psi(ctx1) = r1.unwrap() else { panic!("expected PSI context") };

    assert_eq!(ctx0.suite.curve, CurveType::Curve25519);
    assert_eq!(ctx0.bit_length_after_truncated, -1);
    assert_eq!(ctx0.result_to_rank, None);
    assert_eq!(ctx0.result_to_rank, ctx1.result_to_rank);
    assert_eq!(ctx0.suite, ctx1.suite);
}

#[tokio::test]
async fn scenario_b_psi_refusal_on_result_to_rank() {
    let mesh = InMemoryMesh::new(2);
    let h0 = AlgoHandler::Psi(psi_handler(0, Some(0), 100));
    let h1 = AlgoHandler::Psi(psi_handler(1, None, 100));

    let t0 = mesh.party(0);
    let t1 = mesh.party(1);
    let (r0, r1) = tokio::join!(run_handshake(&t0, 2, &h0), run_handshake(&t1, 2, &h1));

    assert!(matches!(r0, Err(RunError::Refused(_))));
    assert!(matches!(r1, Err(RunError::Refused(_))));
}

#[tokio::test]
async fn scenario_c_two_party_lr_ok() {
    let mesh = InMemoryMesh::new(2);
    let h0 = AlgoHandler::Lr(lr_handler(0, 2, true, 5, 1000, 0.5));
    let h1 = AlgoHandler::Lr(lr_handler(1, 2, false, 7, 1000, 0.5));

    let t0 = mesh.party(0);
    let t1 = mesh.party(1);
    let (r0, r1) = tokio::join!(run_handshake(&t0, 2, &h0), run_handshake(&t1, 2, &h1));

    let NegotiatedContext::Lr(ctx0) = r0.unwrap() else { panic!("expected LR context") };
    let NegotiatedContext::Lr(ctx1) = r1.unwrap() else { panic!("expected LR context") };

    assert_eq!(ctx0.label_rank, 0);
    assert_eq!(ctx0.feature_nums, vec![5, 7]);
    assert_eq!(ctx0.feature_nums, ctx1.feature_nums);
    assert_eq!(ctx0.label_rank, ctx1.label_rank);
    assert_eq!(ctx0.l2_norm, Some(0.5));
    assert_eq!(ctx0.l2_norm, ctx1.l2_norm);
}

#[tokio::test]
async fn scenario_d_lr_refusal_on_sample_mismatch() {
    let mesh = InMemoryMesh::new(2);
    let h0 = AlgoHandler::Lr(lr_handler(0, 2, true, 5, 1000, 0.5));
    let h1 = AlgoHandler::Lr(lr_handler(1, 2, false, 7, 999, 0.5));

    let t0 = mesh.party(0);
    let t1 = mesh.party(1);
    let (r0, r1) = tokio::join!(run_handshake(&t0, 2, &h0), run_handshake(&t1, 2, &h1));

    assert!(matches!(r0, Err(RunError::Refused(msg)) if msg.contains("sample size")));
    assert!(matches!(r1, Err(RunError::Refused(_))));
}

#[tokio::test]
async fn scenario_e_lr_penalty_downgrade() {
    let mesh = InMemoryMesh::new(2);
    let h0 = AlgoHandler::Lr(lr_handler(0, 2, true, 5, 1000, 0.5));
    let h1 = AlgoHandler::Lr(lr_handler(1, 2, false, 7, 1000, 0.0));

    let t0 = mesh.party(0);
    let t1 = mesh.party(1);
    let (r0, r1) = tokio::join!(run_handshake(&t0, 2, &h0), run_handshake(&t1, 2, &h1));

    let NegotiatedContext::Lr(ctx0) = r0.unwrap() else { panic!("expected LR context") };
    let NegotiatedContext::Lr(ctx1) = r1.unwrap() else { panic!("expected LR context") };
    assert_eq!(ctx0.l2_norm, None);
    assert_eq!(ctx1.l2_norm, None);
}

#[tokio::test]
async fn label_uniqueness_fails_when_no_party_holds_label() {
    let mesh = InMemoryMesh::new(2);
    let h0 = AlgoHandler::Lr(lr_handler(0, 2, false, 5, 1000, 0.5));
    let h1 = AlgoHandler::Lr(lr_handler(1, 2, false, 7, 1000, 0.5));

    let t0 = mesh.party(0);
    let t1 = mesh.party(1);
    let (r0, r1) = tokio::join!(run_handshake(&t0, 2, &h0), run_handshake(&t1, 2, &h1));

    assert!(matches!(r0, Err(RunError::Refused(_))));
    assert!(matches!(r1, Err(RunError::Refused(_))));
}

#[tokio::test]
async fn label_uniqueness_fails_when_two_parties_hold_label() {
    let mesh = InMemoryMesh::new(2);
    let h0 = AlgoHandler::Lr(lr_handler(0, 2, true, 5, 1000, 0.5));
    let h1 = AlgoHandler::Lr(lr_handler(1, 2, true, 7, 1000, 0.5));

    let t0 = mesh.party(0);
    let t1 = mesh.party(1);
    let (r0, r1) = tokio::join!(run_handshake(&t0, 2, &h0), run_handshake(&t1, 2, &h1));

    assert!(matches!(r0, Err(RunError::Refused(_))));
    assert!(matches!(r1, Err(RunError::Refused(_))));
}

#[tokio::test]
async fn scenario_f_version_mismatch_refuses_without_deadlock() {
    use ic_core::envelope::HandshakeRequest;
    use ic_transport::MeshTransport;

    let mesh = InMemoryMesh::new(2);
    let h0 = AlgoHandler::Psi(psi_handler(0, None, 100));

    let t0 = mesh.party(0);
    let t1 = mesh.party(1);

    let aggregator = run_handshake(&t0, 2, &h0);
    let rogue_proposer = async {
        let stale_request = HandshakeRequest {
            version: 1,
            requester_rank: 1,
            supported_algos: vec![],
            ops: vec![],
            protocol_families: vec![],
            io_param: vec![],
        };
        let bytes = ic_core::codec::encode(&stale_request).unwrap();
        t1.send(0, "Handshake", bytes).await.unwrap();
        t1.recv(0, "Handshake_response").await.unwrap()
    };

    let (r0, raw_response) = tokio::join!(aggregator, rogue_proposer);

    assert!(matches!(r0, Err(RunError::Refused(msg)) if msg.contains("version")));
    let response: ic_core::envelope::HandshakeResponse = ic_core::codec::decode_response_v2(&raw_response).unwrap();
    assert!(!response.header.code.is_ok());
    assert!(response.header.message.contains("version"));
}

#[tokio::test]
async fn three_party_lr_symmetric_outcome() {
    let mesh = InMemoryMesh::new(3);
    let h0 = AlgoHandler::Lr(lr_handler(0, 3, true, 3, 500, 0.5));
    let h1 = AlgoHandler::Lr(lr_handler(1, 3, false, 4, 500, 0.5));
    let h2 = AlgoHandler::Lr(lr_handler(2, 3, false, 2, 500, 0.5));

    let t0 = mesh.party(0);
    let t1 = mesh.party(1);
    let t2 = mesh.party(2);
    let (r0, r1, r2) = tokio::join!(
        run_handshake(&t0, 3, &h0),
        run_handshake(&t1, 3, &h1),
        run_handshake(&t2, 3, &h2)
    );

    let NegotiatedContext::Lr(ctx0) = r0.unwrap() else { panic!("expected LR context") };
    let NegotiatedContext::Lr(ctx1) = r1.unwrap() else { panic!("expected LR context") };
    let NegotiatedContext::Lr(ctx2) = r2.unwrap() else { panic!("expected LR context") };

    assert_eq!(ctx0.feature_nums, vec![3, 4, 2]);
    assert_eq!(ctx0.feature_nums, ctx1.feature_nums);
    assert_eq!(ctx1.feature_nums, ctx2.feature_nums);
    assert_eq!(ctx0.label_rank, 0);
    assert_eq!(ctx0.label_rank, ctx1.label_rank);
    assert_eq!(ctx1.label_rank, ctx2.label_rank);
    assert_eq!(ctx0.optimizer, OptimizerKind::Sgd);
}

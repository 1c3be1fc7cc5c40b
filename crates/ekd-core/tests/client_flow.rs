//! End-to-end client scenarios against the in-memory transport and a
//! scripted device.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::time::{sleep, Instant};

use ekd_core::testing::{sample_profile, MockTransport, TestDevice};
use ekd_core::{ClientConfig, EnclaveClient, EnclaveError, MemoryStore};
use ekd_wire::{
    AckResponse, ChannelId, CommitInfo, GitSignRequest, Inbound, MeResponse, Request, RequestBody,
    Response, ResponseBody, SignOutcome, SignRequest, SignResponse,
};

struct Harness {
    client: Arc<EnclaveClient>,
    transport: Arc<MockTransport>,
    store: Arc<MemoryStore>,
}

fn harness(request_timeout: Duration) -> Harness {
    let transport = Arc::new(MockTransport::new());
    let store = Arc::new(MemoryStore::new());
    let config = ClientConfig::default()
        .with_request_timeout(request_timeout)
        .with_workstation_name("testbox");
    let client = Arc::new(EnclaveClient::new(
        config,
        transport.clone(),
        store.clone(),
    ));
    Harness {
        client,
        transport,
        store,
    }
}

async fn wait_until_paired(client: &EnclaveClient) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while !client.is_paired().await {
        assert!(Instant::now() < deadline, "pairing did not complete");
        sleep(Duration::from_millis(5)).await;
    }
}

async fn next_sent(transport: &MockTransport) -> (ChannelId, Bytes) {
    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        if let Some(item) = transport.take_sent() {
            return item;
        }
        assert!(Instant::now() < deadline, "no payload was sent");
        sleep(Duration::from_millis(5)).await;
    }
}

/// Pick up the next sent request, open it, and inject the device's reply.
async fn respond(
    transport: &MockTransport,
    device: &TestDevice,
    reply: impl FnOnce(Request) -> ResponseBody,
) {
    let (channel, payload) = next_sent(transport).await;
    let request = device.open_request(&payload);
    let request_id = request.request_id.clone();
    let inbound = Inbound::Response(Response {
        request_id,
        body: reply(request),
    });
    transport.inject(channel, device.seal_inbound(&inbound));
}

async fn paired_harness(request_timeout: Duration) -> (Harness, TestDevice) {
    let h = harness(request_timeout);
    h.client.start().await;
    let secret = h.client.pair().await.unwrap();
    let device = TestDevice::from_secret(&secret);
    h.transport.inject(device.channel(), device.handshake(None));
    wait_until_paired(&h.client).await;
    (h, device)
}

fn sign_request(data: Vec<u8>) -> SignRequest {
    SignRequest {
        data,
        public_key_fingerprint: vec![],
    }
}

fn git_sign_request() -> GitSignRequest {
    GitSignRequest {
        commit: CommitInfo {
            tree: "89a3f1...".into(),
            parent: "b02e77...".into(),
            author: "Dev <dev@example.com> 1700000000 +0000".into(),
            committer: "Dev <dev@example.com> 1700000000 +0000".into(),
            message: b"fix: things\n".to_vec(),
        },
        public_key_fingerprint: vec![],
    }
}

#[tokio::test]
async fn pair_handshake_and_me_round_trip() {
    let (h, device) = paired_harness(Duration::from_millis(500)).await;
    assert!(h.client.is_paired().await);
    // Pairing itself sends nothing; the secret travels out-of-band.
    assert_eq!(h.transport.send_count(), 0);

    let (profile, _) = tokio::join!(h.client.request_me(true), async {
        respond(&h.transport, &device, |req| {
            assert!(matches!(req.body, RequestBody::MeRequest(_)));
            ResponseBody::MeResponse(MeResponse {
                me: sample_profile("dev@example.com"),
            })
        })
        .await;
    });
    let profile = profile.unwrap();
    assert_eq!(profile.email, "dev@example.com");
    assert_eq!(h.client.cached_me().unwrap(), profile);
}

#[tokio::test]
async fn cached_me_skips_the_device() {
    let (h, device) = paired_harness(Duration::from_millis(500)).await;

    let (first, _) = tokio::join!(h.client.request_me(true), async {
        respond(&h.transport, &device, |_| {
            ResponseBody::MeResponse(MeResponse {
                me: sample_profile("dev@example.com"),
            })
        })
        .await;
    });
    first.unwrap();

    let sends_before = h.transport.send_count();
    let cached = h.client.request_me(false).await.unwrap();
    assert_eq!(cached.email, "dev@example.com");
    assert_eq!(h.transport.send_count(), sends_before);
}

#[tokio::test]
async fn handshake_seeds_the_profile_cache() {
    let h = harness(Duration::from_millis(500));
    h.client.start().await;
    let secret = h.client.pair().await.unwrap();
    let device = TestDevice::from_secret(&secret);
    h.transport.inject(
        device.channel(),
        device.handshake(Some(sample_profile("seed@example.com"))),
    );
    wait_until_paired(&h.client).await;

    // Served from the cache the handshake seeded; nothing goes out.
    let profile = h.client.request_me(false).await.unwrap();
    assert_eq!(profile.email, "seed@example.com");
    assert_eq!(h.transport.send_count(), 0);
}

#[tokio::test]
async fn latest_pairing_attempt_wins() {
    let h = harness(Duration::from_millis(500));
    h.client.start().await;

    let first_secret = h.client.pair().await.unwrap();
    let first_device = TestDevice::from_secret(&first_secret);

    let second_secret = h.client.pair().await.unwrap();
    let second_device = TestDevice::from_secret(&second_secret);
    assert_ne!(first_secret.channel, second_secret.channel);

    // The superseded attempt's handshake must not complete anything.
    h.transport
        .inject(first_device.channel(), first_device.handshake(None));
    sleep(Duration::from_millis(50)).await;
    assert!(!h.client.is_paired().await);

    h.transport
        .inject(second_device.channel(), second_device.handshake(None));
    wait_until_paired(&h.client).await;

    // The surviving pairing serves requests normally.
    let (outcome, _) = tokio::join!(
        h.client.request_signature(sign_request(vec![1]), None),
        async {
            respond(&h.transport, &second_device, |_| {
                ResponseBody::SignResponse(SignResponse {
                    outcome: SignOutcome::Signed {
                        signature: vec![7; 64],
                    },
                })
            })
            .await;
        }
    );
    assert_eq!(
        outcome.unwrap(),
        SignOutcome::Signed {
            signature: vec![7; 64]
        }
    );
}

#[tokio::test]
async fn unpair_clears_everything() {
    let (h, device) = paired_harness(Duration::from_millis(500)).await;

    let (me, _) = tokio::join!(h.client.request_me(true), async {
        respond(&h.transport, &device, |_| {
            ResponseBody::MeResponse(MeResponse {
                me: sample_profile("dev@example.com"),
            })
        })
        .await;
    });
    me.unwrap();

    h.client.unpair().await.unwrap();
    assert!(!h.client.is_paired().await);
    assert!(h.client.cached_me().is_none());
    assert!(h.store.snapshot().is_none());

    let err = h.client.request_me(true).await.unwrap_err();
    assert!(matches!(err, EnclaveError::NotPaired));
}

#[tokio::test]
async fn unpair_with_failing_store_still_forgets_the_pairing() {
    let (h, _device) = paired_harness(Duration::from_millis(500)).await;

    h.store.fail_next_write();
    let err = h.client.unpair().await.unwrap_err();
    assert!(matches!(err, EnclaveError::Storage(_)));

    // Memory cleared regardless; only the durable record is stale.
    assert!(!h.client.is_paired().await);
    assert!(h.client.cached_me().is_none());
    assert!(h.store.snapshot().is_some());
}

#[tokio::test]
async fn request_times_out_and_late_response_is_dropped() {
    let (h, device) = paired_harness(Duration::from_millis(80)).await;

    let err = h
        .client
        .request_signature(sign_request(vec![1]), None)
        .await
        .unwrap_err();
    assert!(matches!(err, EnclaveError::Timeout));

    // The device answers after the deadline; the reply has nowhere to land
    // and is dropped without disturbing the pairing.
    let (channel, payload) = next_sent(&h.transport).await;
    let request = device.open_request(&payload);
    h.transport.inject(
        channel,
        device.seal_inbound(&Inbound::Response(Response {
            request_id: request.request_id,
            body: ResponseBody::SignResponse(SignResponse {
                outcome: SignOutcome::Signed {
                    signature: vec![1; 64],
                },
            }),
        })),
    );
    sleep(Duration::from_millis(50)).await;
    assert!(h.client.is_paired().await);
}

#[tokio::test]
async fn responses_resolve_out_of_order() {
    let (h, device) = paired_harness(Duration::from_millis(1000)).await;

    let responder = async {
        let (ch1, p1) = next_sent(&h.transport).await;
        let (ch2, p2) = next_sent(&h.transport).await;
        // Answer in reverse arrival order; each reply echoes its request's
        // data as the signature so the callers can tell them apart.
        for (channel, payload) in [(ch2, p2), (ch1, p1)] {
            let request = device.open_request(&payload);
            let RequestBody::SignRequest(sign) = &request.body else {
                panic!("expected sign request");
            };
            let signature = sign.data.clone();
            h.transport.inject(
                channel,
                device.seal_inbound(&Inbound::Response(Response {
                    request_id: request.request_id.clone(),
                    body: ResponseBody::SignResponse(SignResponse {
                        outcome: SignOutcome::Signed { signature },
                    }),
                })),
            );
        }
    };

    let (a, b, _) = tokio::join!(
        h.client.request_signature(sign_request(vec![0xaa]), None),
        h.client.request_signature(sign_request(vec![0xbb]), None),
        responder,
    );
    assert_eq!(
        a.unwrap(),
        SignOutcome::Signed {
            signature: vec![0xaa]
        }
    );
    assert_eq!(
        b.unwrap(),
        SignOutcome::Signed {
            signature: vec![0xbb]
        }
    );
}

#[tokio::test]
async fn response_with_unknown_id_does_not_resolve_anything() {
    let (h, device) = paired_harness(Duration::from_millis(120)).await;

    let cross_talk = async {
        let (channel, _) = next_sent(&h.transport).await;
        h.transport.inject(
            channel,
            device.seal_inbound(&Inbound::Response(Response {
                request_id: "someone-elses-request".into(),
                body: ResponseBody::SignResponse(SignResponse {
                    outcome: SignOutcome::Signed {
                        signature: vec![0; 64],
                    },
                }),
            })),
        );
    };

    let (result, _) = tokio::join!(
        h.client.request_signature(sign_request(vec![1]), None),
        cross_talk
    );
    assert!(matches!(result.unwrap_err(), EnclaveError::Timeout));
}

#[tokio::test]
async fn git_signature_with_approval_fires_callback_once() {
    let (h, device) = paired_harness(Duration::from_millis(1000)).await;

    let fired = Arc::new(AtomicUsize::new(0));
    let counter = fired.clone();

    let responder = async {
        let (channel, payload) = next_sent(&h.transport).await;
        let request = device.open_request(&payload);
        assert!(matches!(request.body, RequestBody::GitSignRequest(_)));

        // Duplicate approval signals; the callback must fire exactly once.
        for _ in 0..2 {
            h.transport.inject(
                channel,
                device.seal_inbound(&Inbound::ApprovalRequired {
                    request_id: request.request_id.clone(),
                }),
            );
        }
        sleep(Duration::from_millis(50)).await;
        h.transport.inject(
            channel,
            device.seal_inbound(&Inbound::Response(Response {
                request_id: request.request_id,
                body: ResponseBody::GitSignResponse(ekd_wire::GitSignResponse {
                    outcome: SignOutcome::Signed {
                        signature: vec![3; 64],
                    },
                }),
            })),
        );
    };

    let (outcome, _) = tokio::join!(
        h.client.request_git_signature(
            git_sign_request(),
            Some(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })),
        ),
        responder
    );
    assert_eq!(
        outcome.unwrap(),
        SignOutcome::Signed {
            signature: vec![3; 64]
        }
    );
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn rejection_is_a_completed_outcome() {
    let (h, device) = paired_harness(Duration::from_millis(500)).await;

    let (outcome, _) = tokio::join!(
        h.client.request_signature(sign_request(vec![1]), None),
        async {
            respond(&h.transport, &device, |_| {
                ResponseBody::SignResponse(SignResponse {
                    outcome: SignOutcome::Rejected {
                        reason: "user declined".into(),
                    },
                })
            })
            .await;
        }
    );
    assert_eq!(
        outcome.unwrap(),
        SignOutcome::Rejected {
            reason: "user declined".into()
        }
    );
}

#[tokio::test]
async fn mismatched_response_kind_is_a_protocol_error() {
    let (h, device) = paired_harness(Duration::from_millis(500)).await;

    let (result, _) = tokio::join!(h.client.request_me(true), async {
        respond(&h.transport, &device, |_| {
            ResponseBody::AckResponse(AckResponse {})
        })
        .await;
    });
    assert!(matches!(result.unwrap_err(), EnclaveError::Protocol(_)));
}

#[tokio::test]
async fn send_failure_surfaces_and_unregisters() {
    let (h, device) = paired_harness(Duration::from_millis(500)).await;

    h.transport.fail_sends(true);
    let err = h
        .client
        .request_signature(sign_request(vec![1]), None)
        .await
        .unwrap_err();
    assert!(matches!(err, EnclaveError::Transport(_)));
    assert!(err.is_send_failure());

    // The table is clean: a later request works normally.
    h.transport.fail_sends(false);
    let (outcome, _) = tokio::join!(
        h.client.request_signature(sign_request(vec![2]), None),
        async {
            respond(&h.transport, &device, |_| {
                ResponseBody::SignResponse(SignResponse {
                    outcome: SignOutcome::Signed {
                        signature: vec![2; 64],
                    },
                })
            })
            .await;
        }
    );
    outcome.unwrap();
}

#[tokio::test]
async fn stop_cancels_in_flight_requests() {
    let (h, _device) = paired_harness(Duration::from_secs(5)).await;

    let client = h.client.clone();
    let task =
        tokio::spawn(async move { client.request_signature(sign_request(vec![1]), None).await });

    // Let the request reach the transport before tearing down.
    next_sent(&h.transport).await;
    h.client.stop();

    let result = task.await.unwrap();
    assert!(matches!(result.unwrap_err(), EnclaveError::Cancelled));
}

#[tokio::test]
async fn persisted_pairing_survives_restart() {
    let (h, device) = paired_harness(Duration::from_millis(500)).await;
    h.client.stop();
    drop(h.client);

    // Same store, fresh transport and client.
    let transport = Arc::new(MockTransport::new());
    let client = EnclaveClient::new(
        ClientConfig::default().with_request_timeout(Duration::from_millis(500)),
        transport.clone(),
        h.store.clone(),
    );
    client.start().await;
    assert!(client.is_paired().await);

    // The restored keys still speak to the same device.
    let (outcome, _) = tokio::join!(
        client.request_signature(sign_request(vec![9]), None),
        async {
            respond(&transport, &device, |_| {
                ResponseBody::SignResponse(SignResponse {
                    outcome: SignOutcome::Signed {
                        signature: vec![9; 64],
                    },
                })
            })
            .await;
        }
    );
    outcome.unwrap();
}

#[tokio::test]
async fn corrupt_persisted_record_starts_unpaired() {
    let store = Arc::new(MemoryStore::new());
    store.seed(ekd_core::store::StoredPairing::Paired {
        secret_key: vec![1; 5],
        device_public_key: vec![2; 32],
        channel: ChannelId::from_bytes([0; 16]),
    });

    let transport = Arc::new(MockTransport::new());
    let client = EnclaveClient::new(ClientConfig::default(), transport, store);
    client.start().await;
    assert!(!client.is_paired().await);
}

#[tokio::test]
async fn no_op_is_silent_when_unpaired() {
    let h = harness(Duration::from_millis(500));
    h.client.start().await;

    h.client.request_no_op().await;
    assert_eq!(h.transport.send_count(), 0);
}

#[tokio::test]
async fn no_op_reaches_the_device_when_paired() {
    let (h, device) = paired_harness(Duration::from_millis(500)).await;

    h.client.request_no_op().await;
    let (channel, payload) = next_sent(&h.transport).await;
    assert_eq!(channel, device.channel());
    let request = device.open_request(&payload);
    assert!(matches!(request.body, RequestBody::NoOpRequest(_)));
}

#[tokio::test]
async fn garbage_payloads_are_ignored() {
    let (h, device) = paired_harness(Duration::from_millis(500)).await;

    h.transport
        .inject(device.channel(), Bytes::from_static(b"not even sealed"));
    sleep(Duration::from_millis(50)).await;

    // Still paired and still functional.
    let (outcome, _) = tokio::join!(
        h.client.request_signature(sign_request(vec![4]), None),
        async {
            respond(&h.transport, &device, |_| {
                ResponseBody::SignResponse(SignResponse {
                    outcome: SignOutcome::Signed {
                        signature: vec![4; 64],
                    },
                })
            })
            .await;
        }
    );
    outcome.unwrap();
}

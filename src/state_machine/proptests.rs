//! Property-based tests for the state machine
//!
//! These tests verify key invariants hold across all possible inputs.

use super::state::*;
use super::transition::*;
use super::*;
use crate::attachments::AttachmentError;
use crate::llm::LlmErrorKind;
use proptest::prelude::*;
use std::collections::HashSet;

// ============================================================================
// Test Helpers
// ============================================================================

fn image(tag: &str) -> ImageData {
    ImageData {
        data: tag.to_string(),
        media_type: "image/png".to_string(),
    }
}

/// Operations a session sees, abstracted over message ids. Stream events
/// are bound to the current streaming reply when the op is applied.
#[derive(Debug, Clone)]
enum Op {
    Send(String),
    SendMedia { text: String, explicit: bool },
    AddAttachments(usize),
    Resolve(Vec<bool>),
    Chunk(String),
    Complete,
    Fail(LlmErrorKind),
    Cancel,
    Stale(u64),
}

fn to_event(state: &ChatState, op: Op) -> Event {
    let streaming_id = state.streaming_message().map(|m| m.id).unwrap_or(u64::MAX);
    match op {
        Op::Send(text) => Event::SendText { text },
        Op::SendMedia { text, explicit } => Event::SendMultiMedia {
            text,
            attachments: explicit.then(|| vec![image("explicit")]),
        },
        Op::AddAttachments(n) => Event::AddAttachments {
            sources: (0..n).map(|i| format!("img{i}.png")).collect(),
        },
        Op::Resolve(oks) => Event::AttachmentsResolved {
            results: oks
                .into_iter()
                .enumerate()
                .map(|(i, ok)| {
                    if ok {
                        Ok(image(&format!("r{i}")))
                    } else {
                        Err(AttachmentError::NotFound {
                            source_ref: format!("r{i}.png"),
                        })
                    }
                })
                .collect(),
        },
        Op::Chunk(text) => Event::StreamChunk {
            message_id: streaming_id,
            text,
        },
        Op::Complete => Event::StreamComplete {
            message_id: streaming_id,
        },
        Op::Fail(error_kind) => Event::StreamFailed {
            message_id: streaming_id,
            message: "stream broke".to_string(),
            error_kind,
        },
        Op::Cancel => Event::UserCancel,
        Op::Stale(message_id) => Event::StreamChunk {
            message_id,
            text: "late".to_string(),
        },
    }
}

// ============================================================================
// Arbitrary Generators
// ============================================================================

fn arb_error_kind() -> impl Strategy<Value = LlmErrorKind> {
    prop_oneof![
        Just(LlmErrorKind::Network),
        Just(LlmErrorKind::RateLimit),
        Just(LlmErrorKind::ServerError),
        Just(LlmErrorKind::Auth),
        Just(LlmErrorKind::Blocked),
    ]
}

fn arb_policy() -> impl Strategy<Value = AttachmentPolicy> {
    prop_oneof![
        Just(AttachmentPolicy::SkipFailed),
        Just(AttachmentPolicy::AbortBatch),
    ]
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => "[a-zA-Z ]{0,12}".prop_map(Op::Send),
        2 => ("[a-zA-Z]{1,12}", any::<bool>())
            .prop_map(|(text, explicit)| Op::SendMedia { text, explicit }),
        1 => (0usize..4).prop_map(Op::AddAttachments),
        2 => proptest::collection::vec(any::<bool>(), 0..5).prop_map(Op::Resolve),
        6 => "[a-z ]{0,6}".prop_map(Op::Chunk),
        2 => Just(Op::Complete),
        1 => arb_error_kind().prop_map(Op::Fail),
        1 => Just(Op::Cancel),
        1 => (0u64..8).prop_map(Op::Stale),
    ]
}

// ============================================================================
// State Validity Checkers
// ============================================================================

fn check_invariants(state: &ChatState) -> Result<(), TestCaseError> {
    let streaming: Vec<_> = state.messages.iter().filter(|m| m.is_streaming()).collect();
    prop_assert!(streaming.len() <= 1, "multiple streaming replies: {:?}", streaming);
    prop_assert_eq!(state.loading, streaming.len() == 1);

    let users = state.messages.iter().filter(|m| m.sender == Sender::User).count();
    prop_assert_eq!(users, state.messages.len() - users);

    let ids: HashSet<u64> = state.messages.iter().map(|m| m.id).collect();
    prop_assert_eq!(ids.len(), state.messages.len(), "duplicate message ids");

    if let Some(last_reply) = state
        .messages
        .iter()
        .rev()
        .find(|m| m.sender == Sender::Assistant)
    {
        prop_assert_eq!(&state.last_response_fragment, &last_reply.text);
    }

    prop_assert!(
        !state.pending_attachments.as_ref().is_some_and(Vec::is_empty),
        "pending attachments should be None, not empty"
    );
    Ok(())
}

fn check_finalized_unchanged(before: &ChatState, after: &ChatState) -> Result<(), TestCaseError> {
    for old in before.messages.iter().filter(|m| m.status.is_finalized()) {
        prop_assert_eq!(Some(old), after.message(old.id), "finalized message changed");
    }
    prop_assert!(after.messages.len() >= before.messages.len());
    Ok(())
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    // Invariants hold for arbitrary interleavings, rejected events included
    #[test]
    fn prop_invariants_hold_for_any_sequence(
        ops in proptest::collection::vec(arb_op(), 0..40),
        policy in arb_policy(),
    ) {
        let ctx = ChatContext::new(policy);
        let mut state = ChatState::default();

        for op in ops {
            let event = to_event(&state, op);
            match transition(&state, &ctx, event) {
                Ok(result) => {
                    check_finalized_unchanged(&state, &result.new_state)?;
                    state = result.new_state;
                }
                Err(_) => { /* Rejected events leave state untouched */ }
            }
            check_invariants(&state)?;
        }
    }

    // Completed exchanges pair every user message with one finished reply
    #[test]
    fn prop_completed_sends_balance(
        exchanges in proptest::collection::vec(
            ("[a-zA-Z]{1,10}", proptest::collection::vec("[a-z ]{0,5}", 0..6)),
            1..6,
        )
    ) {
        let ctx = ChatContext::default();
        let mut state = ChatState::default();

        for (prompt, chunks) in &exchanges {
            state = transition(&state, &ctx, Event::SendText { text: prompt.clone() })
                .unwrap()
                .new_state;
            let reply_id = state.streaming_message().unwrap().id;
            for text in chunks {
                state = transition(&state, &ctx, Event::StreamChunk {
                    message_id: reply_id,
                    text: text.clone(),
                })
                .unwrap()
                .new_state;
            }
            state = transition(&state, &ctx, Event::StreamComplete { message_id: reply_id })
                .unwrap()
                .new_state;

            prop_assert_eq!(&state.last_response_fragment, &chunks.concat());
        }

        prop_assert!(!state.loading);
        prop_assert_eq!(state.messages.len(), exchanges.len() * 2);
        prop_assert!(state.messages.iter().all(|m| m.status == MessageStatus::Complete));
    }

    // Sends are rejected while any reply is streaming
    #[test]
    fn prop_busy_rejects_sends(
        chunks in proptest::collection::vec("[a-z]{1,4}", 0..4),
        text in "[a-zA-Z]{1,10}",
    ) {
        let ctx = ChatContext::default();
        let mut state = transition(&ChatState::default(), &ctx, Event::SendText { text: "q".into() })
            .unwrap()
            .new_state;
        let reply_id = state.streaming_message().unwrap().id;
        for chunk in chunks {
            state = transition(&state, &ctx, Event::StreamChunk { message_id: reply_id, text: chunk })
                .unwrap()
                .new_state;
        }

        let result = transition(&state, &ctx, Event::SendText { text });
        prop_assert_eq!(result.unwrap_err(), TransitionError::ResponseInFlight);
    }

    // Skip policy keeps every success in order and reports every failure
    #[test]
    fn prop_skip_policy_partitions_batch(oks in proptest::collection::vec(any::<bool>(), 0..8)) {
        let ctx = ChatContext::new(AttachmentPolicy::SkipFailed);
        let event = to_event(&ChatState::default(), Op::Resolve(oks.clone()));
        let result = transition(&ChatState::default(), &ctx, event).unwrap();

        let expected: Vec<ImageData> = oks
            .iter()
            .enumerate()
            .filter(|(_, ok)| **ok)
            .map(|(i, _)| image(&format!("r{i}")))
            .collect();
        prop_assert_eq!(result.new_state.pending_attachments.unwrap_or_default(), expected);

        let reports = result
            .effects
            .iter()
            .filter(|e| matches!(e, Effect::ReportError { .. }))
            .count();
        prop_assert_eq!(reports, oks.iter().filter(|ok| !**ok).count());
    }

    // Abort policy is all-or-nothing
    #[test]
    fn prop_abort_policy_all_or_nothing(oks in proptest::collection::vec(any::<bool>(), 1..8)) {
        let ctx = ChatContext::new(AttachmentPolicy::AbortBatch);
        let event = to_event(&ChatState::default(), Op::Resolve(oks.clone()));
        let result = transition(&ChatState::default(), &ctx, event).unwrap();

        if oks.iter().all(|ok| *ok) {
            prop_assert_eq!(result.new_state.pending_attachment_count(), oks.len());
        } else {
            prop_assert!(result.new_state.pending_attachments.is_none());
            prop_assert_eq!(result.effects.len(), 1);
        }
    }

    // Cancel freezes whatever text arrived and ends loading
    #[test]
    fn prop_cancel_freezes_reply(chunks in proptest::collection::vec("[a-z]{1,4}", 0..5)) {
        let ctx = ChatContext::default();
        let mut state = transition(&ChatState::default(), &ctx, Event::SendText { text: "q".into() })
            .unwrap()
            .new_state;
        let reply_id = state.streaming_message().unwrap().id;
        for chunk in &chunks {
            state = transition(&state, &ctx, Event::StreamChunk {
                message_id: reply_id,
                text: chunk.clone(),
            })
            .unwrap()
            .new_state;
        }

        let result = transition(&state, &ctx, Event::UserCancel).unwrap();
        let reply = result.new_state.message(reply_id).unwrap();
        prop_assert_eq!(reply.status, MessageStatus::Cancelled);
        prop_assert_eq!(&reply.text, &chunks.concat());
        prop_assert!(!result.new_state.loading);
        prop_assert!(result.effects.contains(&Effect::AbortStream));
    }
}

// Integration tests for the league bot.
//
// These drive `app::handle_event` with decoded gateway frames against the
// shipped default configuration and an in-memory ledger, checking the
// actions a platform bridge would receive.

use std::path::Path;

use league_bot::app::{self, AppState};
use league_bot::config::{self, Config};
use league_bot::db::Ledger;
use league_bot::protocol::*;

// ===========================================================================
// Test helpers
// ===========================================================================

const DEFAULTS: &str = "defaults/bot.toml";

const NEWCASTLE_ROLE: u64 = 1323533878220165153;
const NAPOLI_ROLE: u64 = 1323533531028263035;
const COMMAND_CHANNEL: u64 = 42;

fn default_config() -> Config {
    let text = std::fs::read_to_string(DEFAULTS).expect("defaults/bot.toml should exist");
    config::parse_config(&text, Path::new(DEFAULTS)).expect("defaults should be valid")
}

/// State after READY, with both output channels resolvable.
fn ready_state() -> AppState {
    let config = default_config();
    let channels = vec![
        config.channels.fines,
        config.channels.announcements,
        COMMAND_CHANNEL,
    ];
    let mut state = AppState::new(config, Ledger::open(":memory:").unwrap());
    app::handle_event(
        &mut state,
        GatewayEvent::Ready(ReadyPayload {
            user: User {
                id: 1,
                name: "LeagueBot".into(),
                bot: true,
                avatar_url: None,
            },
            channels,
        }),
    )
    .unwrap();
    state
}

fn msg(author: u64, roles: &[u64], content: &str) -> GatewayEvent {
    GatewayEvent::MessageCreate(MessagePayload {
        message_id: 100,
        channel_id: COMMAND_CHANNEL,
        author: User {
            id: author,
            name: format!("member{author}"),
            bot: false,
            avatar_url: None,
        },
        member_roles: roles.to_vec(),
        content: content.into(),
        attachments: vec![],
    })
}

fn msg_with_proof(author: u64, roles: &[u64], content: &str) -> GatewayEvent {
    match msg(author, roles, content) {
        GatewayEvent::MessageCreate(mut payload) => {
            payload.attachments.push(Attachment {
                url: "https://cdn.example/contract.jpg".into(),
                filename: "contract.jpg".into(),
                content_type: None,
            });
            GatewayEvent::MessageCreate(payload)
        }
        _ => unreachable!(),
    }
}

fn send(state: &mut AppState, event: GatewayEvent) -> Vec<GatewayAction> {
    app::handle_event(state, event).unwrap()
}

/// The single text reply in `actions`.
fn reply_text(actions: &[GatewayAction]) -> &str {
    match actions {
        [GatewayAction::SendMessage {
            channel_id,
            message,
        }] if *channel_id == COMMAND_CHANNEL => message.content.as_deref().unwrap(),
        other => panic!("expected a single reply, got {other:?}"),
    }
}

/// The single embed posted to `channel` in `actions`.
fn posted_embed(actions: &[GatewayAction], channel: u64) -> &Embed {
    match actions {
        [GatewayAction::SendMessage {
            channel_id,
            message,
        }] if *channel_id == channel => message.embed.as_ref().unwrap(),
        other => panic!("expected a single post to {channel}, got {other:?}"),
    }
}

// ===========================================================================
// Fines
// ===========================================================================

#[test]
fn fines_accumulate_and_bail_floors_at_zero() {
    let mut state = ready_state();
    let fines_channel = state.config.channels.fines;

    let actions = send(&mut state, msg(7, &[], "!fine <@9> 50 missed match"));
    assert_eq!(posted_embed(&actions, fines_channel).title, "🚨 Fine Issued");
    send(&mut state, msg(7, &[], "!fine <@9> 30"));
    assert_eq!(state.ledger.fine_balance(9).unwrap(), 80);

    let actions = send(&mut state, msg(7, &[], "!bail <@9> 100"));
    let embed = posted_embed(&actions, fines_channel);
    assert_eq!(embed.title, "🟦 Bail Processed");
    assert!(embed
        .description
        .as_deref()
        .unwrap()
        .contains("**Remaining Fine:** `$0`"));
    assert_eq!(state.ledger.fine_balance(9).unwrap(), 0);

    // Profile shows no outstanding fines once paid off.
    let actions = send(&mut state, msg(9, &[], "!profile"));
    let embed = posted_embed(&actions, COMMAND_CHANNEL);
    assert_eq!(embed.field_value("Fines (Unpaid)"), Some("None"));
}

#[test]
fn bail_for_user_without_record() {
    let mut state = ready_state();
    let actions = send(&mut state, msg(7, &[], "!bail <@9> 10"));
    assert_eq!(reply_text(&actions), "ℹ️ <@9> has no fines recorded.");
}

#[test]
fn fine_restricted_to_issuer_roles_when_configured() {
    let mut state = ready_state();
    state.config.permissions.fine_issuer_roles = vec![NAPOLI_ROLE];

    let actions = send(&mut state, msg(7, &[], "!fine <@9> 10"));
    assert_eq!(reply_text(&actions), "❌ You are not allowed to issue fines.");
    assert_eq!(state.ledger.fine_balance(9).unwrap(), 0);

    send(&mut state, msg(7, &[NAPOLI_ROLE], "!fine <@9> 10"));
    assert_eq!(state.ledger.fine_balance(9).unwrap(), 10);
}

#[test]
fn announcements_skipped_before_channels_resolve() {
    let config = default_config();
    let mut state = AppState::new(config, Ledger::open(":memory:").unwrap());

    // No READY yet, so no channel is resolvable.
    let actions = send(&mut state, msg(7, &[], "!fine <@9> 10"));
    assert!(actions.is_empty());
    assert_eq!(state.ledger.fine_balance(9).unwrap(), 10);
}

// ===========================================================================
// Signings
// ===========================================================================

#[test]
fn sign_with_too_many_seasons_is_rejected() {
    let mut state = ready_state();
    let actions = send(&mut state, msg_with_proof(7, &[NAPOLI_ROLE], "!sign <@9> 5"));
    assert_eq!(reply_text(&actions), "❌ Seasons must be between 1 and 4.");
    assert!(state.ledger.roster_entry(9).unwrap().is_none());
}

#[test]
fn sign_without_attachment_is_rejected() {
    let mut state = ready_state();
    let actions = send(&mut state, msg(7, &[NAPOLI_ROLE], "!sign <@9> 2"));
    assert_eq!(
        reply_text(&actions),
        "❌ Please provide proof as an image attachment."
    );
    assert!(state.ledger.roster_entry(9).unwrap().is_none());
}

#[test]
fn sign_then_release_updates_rosters() {
    let mut state = ready_state();
    let announcements = state.config.channels.announcements;

    let actions = send(
        &mut state,
        msg_with_proof(7, &[NAPOLI_ROLE, NEWCASTLE_ROLE], "!sign <@9> 3"),
    );
    let embed = posted_embed(&actions, announcements);
    assert_eq!(embed.title, "✅ Player Signed!");
    // Newcastle is declared first in the default bindings.
    assert!(embed
        .description
        .as_deref()
        .unwrap()
        .contains("**Newcastle United** for **3 season(s)**"));
    assert_eq!(state.ledger.list_teams().unwrap(), vec!["Newcastle United"]);

    let actions = send(&mut state, msg(7, &[NEWCASTLE_ROLE], "!release <@9>"));
    assert_eq!(
        posted_embed(&actions, announcements).title,
        "⚠️ Player Released"
    );
    assert!(state.ledger.list_teams().unwrap().is_empty());
}

// ===========================================================================
// Team rosters
// ===========================================================================

#[test]
fn teams_without_signings() {
    let mut state = ready_state();
    let actions = send(&mut state, msg(7, &[], "!teams"));
    assert_eq!(reply_text(&actions), "ℹ️ No teams have players signed yet.");
}

#[test]
fn team_picker_round_trip() {
    let mut state = ready_state();
    send(&mut state, msg_with_proof(7, &[NAPOLI_ROLE], "!sign <@9> 2"));
    send(&mut state, msg_with_proof(7, &[NAPOLI_ROLE], "!sign <@10> 1"));
    send(&mut state, msg_with_proof(8, &[NEWCASTLE_ROLE], "!sign <@11> 4"));

    let actions = send(&mut state, msg(12, &[], "!teams"));
    let buttons = match &actions[..] {
        [GatewayAction::SendMessage { message, .. }] => message.components.clone(),
        other => panic!("unexpected actions: {other:?}"),
    };
    let labels: Vec<&str> = buttons.iter().map(|b| b.label.as_str()).collect();
    assert_eq!(labels, vec!["Napoli FC", "Newcastle United"]);

    let click = |user: u64| {
        GatewayEvent::InteractionCreate(InteractionPayload {
            interaction_id: 500 + user,
            channel_id: COMMAND_CHANNEL,
            message_id: 300,
            user: User {
                id: user,
                name: format!("member{user}"),
                bot: false,
                avatar_url: None,
            },
            custom_id: buttons[0].custom_id.clone(),
        })
    };

    let actions = send(&mut state, click(12));
    assert_eq!(actions.len(), 2);
    assert!(matches!(
        actions[0],
        GatewayAction::DisableComponents {
            channel_id: COMMAND_CHANNEL,
            message_id: 300
        }
    ));
    match &actions[1] {
        GatewayAction::EphemeralReply {
            interaction_id,
            message,
        } => {
            assert_eq!(*interaction_id, 512);
            let embed = message.embed.as_ref().unwrap();
            assert_eq!(embed.title, "📋 Napoli FC Roster");
            assert_eq!(embed.field_value("Manager"), Some("<@7>"));
            let players = embed.field_value("Players").unwrap();
            assert!(players.contains("<@9>"));
            assert!(players.contains("<@10>"));
            assert!(!players.contains("<@11>"));
        }
        other => panic!("unexpected action: {other:?}"),
    }

    // The picker only answers once.
    assert!(send(&mut state, click(13)).is_empty());
}

// ===========================================================================
// Wire format
// ===========================================================================

#[test]
fn inbound_frame_drives_outbound_frame() {
    let mut state = ready_state();
    let frame = format!(
        r#"{{"t":"MESSAGE_CREATE","message_id":1,"channel_id":{COMMAND_CHANNEL},"author":{{"id":9,"name":"kim","avatar_url":"https://cdn.example/kim.png"}},"member_roles":[{NAPOLI_ROLE}],"content":"!profile","attachments":[]}}"#
    );
    let event: GatewayEvent = serde_json::from_str(&frame).unwrap();

    let actions = send(&mut state, event);
    let json = serde_json::to_value(&actions[0]).unwrap();
    assert_eq!(json["op"], "send_message");
    assert_eq!(json["channel_id"], COMMAND_CHANNEL);
    assert_eq!(json["message"]["embed"]["title"], "📂 User Profile");
    assert_eq!(
        json["message"]["embed"]["thumbnail_url"],
        "https://cdn.example/kim.png"
    );
}

#[test]
fn invalid_session_stops_the_bot() {
    let mut state = ready_state();
    let result = app::handle_event(
        &mut state,
        GatewayEvent::InvalidSession {
            reason: "Authentication failed".into(),
        },
    );
    assert!(result.is_err());
}

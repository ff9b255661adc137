// Application state and event loop.
//
// Consumes gateway events one at a time, routes commands and button clicks
// to the handlers, and forwards the resulting actions to the gateway writer.
// Events are processed strictly in order, so ledger access is serialised.

use anyhow::bail;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::announce::Announcer;
use crate::command;
use crate::config::Config;
use crate::db::Ledger;
use crate::handlers::{self, CommandError, HandlerContext, TeamViews};
use crate::protocol::{
    GatewayAction, GatewayEvent, InteractionPayload, MessagePayload, OutgoingMessage,
    ReadyPayload, User,
};

// ---------------------------------------------------------------------------
// AppState
// ---------------------------------------------------------------------------

/// Everything the bot owns while running.
pub struct AppState {
    pub config: Config,
    pub ledger: Ledger,
    pub announcer: Announcer,
    pub team_views: TeamViews,
    /// Set once the gateway reports READY.
    pub bot_user: Option<User>,
}

impl AppState {
    pub fn new(config: Config, ledger: Ledger) -> Self {
        let announcer = Announcer::new(config.channels.clone());
        AppState {
            config,
            ledger,
            announcer,
            team_views: TeamViews::new(),
            bot_user: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Event loop
// ---------------------------------------------------------------------------

/// Run until the gateway side closes `event_rx` or a fatal event arrives.
/// The writer going away first means the connection failed.
pub async fn run(
    mut event_rx: mpsc::Receiver<GatewayEvent>,
    action_tx: mpsc::Sender<GatewayAction>,
    mut state: AppState,
) -> anyhow::Result<()> {
    info!("Application event loop started");

    while let Some(event) = event_rx.recv().await {
        for action in handle_event(&mut state, event)? {
            if action_tx.send(action).await.is_err() {
                bail!("gateway writer stopped while actions were pending");
            }
        }
    }

    info!("Gateway event channel closed, stopping event loop");
    Ok(())
}

/// Apply one gateway event to the state and return the actions it produces.
///
/// Command failures are turned into replies here; only an invalid session is
/// returned as an error.
pub fn handle_event(
    state: &mut AppState,
    event: GatewayEvent,
) -> anyhow::Result<Vec<GatewayAction>> {
    match event {
        GatewayEvent::Ready(payload) => {
            handle_ready(state, payload);
            Ok(vec![])
        }
        GatewayEvent::MessageCreate(msg) => Ok(handle_message(state, &msg)),
        GatewayEvent::InteractionCreate(interaction) => {
            Ok(handle_interaction(state, &interaction))
        }
        GatewayEvent::InvalidSession { reason } => {
            bail!("gateway rejected the session: {reason}")
        }
    }
}

fn handle_ready(state: &mut AppState, payload: ReadyPayload) {
    info!(
        "Bot is ready. Logged in as {} ({})",
        payload.user.name, payload.user.id
    );
    debug!("{} channels resolvable", payload.channels.len());
    state.announcer.set_resolvable(payload.channels);
    state.bot_user = Some(payload.user);
}

fn handle_message(state: &mut AppState, msg: &MessagePayload) -> Vec<GatewayAction> {
    if msg.author.bot {
        return vec![];
    }

    let prefix = &state.config.command_prefix;
    let parsed = match command::parse(prefix, &msg.content) {
        Some(parsed) => parsed,
        None => {
            if msg.content.trim_start().starts_with(prefix.as_str()) {
                debug!("Ignoring unknown command from {}", msg.author.id);
            }
            return vec![];
        }
    };

    let command = match parsed {
        Ok(command) => command,
        Err(e) => {
            debug!("Rejected command from {}: {}", msg.author.id, e);
            return vec![GatewayAction::reply(msg.channel_id, e.to_string())];
        }
    };

    let name = command.name();
    info!("!{} from {} in {}", name, msg.author.id, msg.channel_id);

    let ctx = HandlerContext {
        ledger: &state.ledger,
        config: &state.config,
        announcer: &state.announcer,
    };
    match handlers::dispatch(&ctx, &mut state.team_views, msg, command) {
        Ok(actions) => actions,
        Err(e) => {
            log_failure(name, &e);
            vec![GatewayAction::reply(msg.channel_id, e.reply_text())]
        }
    }
}

fn handle_interaction(state: &mut AppState, interaction: &InteractionPayload) -> Vec<GatewayAction> {
    let ctx = HandlerContext {
        ledger: &state.ledger,
        config: &state.config,
        announcer: &state.announcer,
    };
    match handlers::select_team(&ctx, &mut state.team_views, interaction) {
        Ok(actions) => actions,
        Err(e) => {
            log_failure("teams", &e);
            vec![GatewayAction::EphemeralReply {
                interaction_id: interaction.interaction_id,
                message: OutgoingMessage::text(e.reply_text()),
            }]
        }
    }
}

fn log_failure(command: &str, err: &CommandError) {
    match err {
        CommandError::Ledger(e) => error!("!{} failed: {}", command, e),
        other => debug!("!{} rejected: {}", command, other),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ChannelConfig, PermissionsConfig};
    use crate::roles::{TeamBinding, TeamRoles};

    fn test_state() -> AppState {
        let config = Config {
            command_prefix: "!".into(),
            gateway_url: "ws://localhost".into(),
            db_path: ":memory:".into(),
            channels: ChannelConfig {
                fines: 1,
                announcements: 2,
            },
            permissions: PermissionsConfig::default(),
            teams: TeamRoles::new(vec![TeamBinding {
                role_id: 10,
                name: "Napoli FC".into(),
            }]),
        };
        AppState::new(config, Ledger::open(":memory:").unwrap())
    }

    fn user(id: u64, bot: bool) -> User {
        User {
            id,
            name: format!("user{id}"),
            bot,
            avatar_url: None,
        }
    }

    fn message(author: User, content: &str) -> GatewayEvent {
        GatewayEvent::MessageCreate(MessagePayload {
            message_id: 1,
            channel_id: 3,
            author,
            member_roles: vec![],
            content: content.into(),
            attachments: vec![],
        })
    }

    fn ready(channels: Vec<u64>) -> GatewayEvent {
        GatewayEvent::Ready(ReadyPayload {
            user: user(999, true),
            channels,
        })
    }

    #[test]
    fn ready_records_bot_user_and_channels() {
        let mut state = test_state();
        assert!(handle_event(&mut state, ready(vec![1, 2])).unwrap().is_empty());
        assert_eq!(state.bot_user.as_ref().map(|u| u.id), Some(999));

        let actions = handle_event(&mut state, message(user(5, false), "!fine <@6> 10")).unwrap();
        assert_eq!(actions.len(), 1);
    }

    #[test]
    fn bot_authors_and_plain_chat_are_ignored() {
        let mut state = test_state();
        handle_event(&mut state, ready(vec![1, 2])).unwrap();

        assert!(handle_event(&mut state, message(user(5, true), "!fine <@6> 10"))
            .unwrap()
            .is_empty());
        assert!(handle_event(&mut state, message(user(5, false), "good game"))
            .unwrap()
            .is_empty());
        assert_eq!(state.ledger.fine_balance(6).unwrap(), 0);
    }

    #[test]
    fn parse_errors_are_replied_in_channel() {
        let mut state = test_state();
        let actions = handle_event(&mut state, message(user(5, false), "!bail")).unwrap();
        match &actions[..] {
            [GatewayAction::SendMessage {
                channel_id,
                message,
            }] => {
                assert_eq!(*channel_id, 3);
                assert!(message.content.as_deref().unwrap().starts_with("❌ Missing argument"));
            }
            other => panic!("unexpected actions: {other:?}"),
        }
    }

    #[test]
    fn handler_errors_are_replied_in_channel() {
        let mut state = test_state();
        let actions =
            handle_event(&mut state, message(user(5, false), "!release <@6>")).unwrap();
        assert_eq!(
            actions,
            vec![GatewayAction::reply(3, "❌ You are not a team manager.")]
        );
    }

    #[test]
    fn invalid_session_is_fatal() {
        let mut state = test_state();
        let err = handle_event(
            &mut state,
            GatewayEvent::InvalidSession {
                reason: "bad token".into(),
            },
        )
        .unwrap_err();
        assert!(err.to_string().contains("bad token"));
    }

    #[tokio::test]
    async fn run_forwards_actions_and_stops_when_events_end() {
        let (event_tx, event_rx) = mpsc::channel(8);
        let (action_tx, mut action_rx) = mpsc::channel(8);

        event_tx.send(ready(vec![1, 2])).await.unwrap();
        event_tx
            .send(message(user(5, false), "!fine <@6> 25 offside"))
            .await
            .unwrap();
        drop(event_tx);

        run(event_rx, action_tx, test_state()).await.unwrap();

        match action_rx.recv().await {
            Some(GatewayAction::SendMessage { channel_id, message }) => {
                assert_eq!(channel_id, 1);
                assert_eq!(message.embed.unwrap().title, "🚨 Fine Issued");
            }
            other => panic!("unexpected action: {other:?}"),
        }
        assert!(action_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn run_propagates_invalid_session() {
        let (event_tx, event_rx) = mpsc::channel(8);
        let (action_tx, _action_rx) = mpsc::channel(8);

        event_tx
            .send(GatewayEvent::InvalidSession {
                reason: "revoked".into(),
            })
            .await
            .unwrap();

        assert!(run(event_rx, action_tx, test_state()).await.is_err());
    }

    #[tokio::test]
    async fn run_fails_when_gateway_writer_is_gone() {
        let (event_tx, event_rx) = mpsc::channel(8);
        let (action_tx, action_rx) = mpsc::channel(8);
        drop(action_rx);

        event_tx.send(ready(vec![1, 2])).await.unwrap();
        event_tx
            .send(message(user(5, false), "!fine <@6> 25"))
            .await
            .unwrap();
        drop(event_tx);

        let err = run(event_rx, action_tx, test_state()).await.unwrap_err();
        assert!(err.to_string().contains("gateway writer stopped"));
    }
}

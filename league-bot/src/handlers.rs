// Command handlers.
//
// Each handler validates the caller and arguments, touches the ledger, and
// returns the outbound actions to perform. Validation always happens before
// the first ledger write, so a rejected command leaves no trace.

use std::collections::BTreeMap;

use thiserror::Error;
use tracing::{debug, info};

use crate::announce::{Announcer, Destination};
use crate::command::{Command, ParseError};
use crate::config::Config;
use crate::db::{BailOutcome, Ledger, LedgerError, RosterEntry, MAX_BALANCE};
use crate::protocol::{
    colors, mention, Button, Embed, GatewayAction, InteractionPayload, MessagePayload,
    OutgoingMessage, UserId,
};

pub const NO_TEAMS_MESSAGE: &str = "ℹ️ No teams have players signed yet.";
pub const TEAM_PICKER_PROMPT: &str = "Select a team to view its roster:";
pub const GENERIC_FAILURE: &str = "⚠️ Something went wrong while processing that command.";
const DEFAULT_REASON: &str = "No reason provided";

/// Maximum contract length in seasons.
pub const MAX_SEASONS: u8 = 4;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Why a command was not carried out. The display text of every variant
/// except `Ledger` is sent back to the caller verbatim.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Invalid(String),

    /// Nothing to act on. Informational, not a failure.
    #[error("{0}")]
    NotFound(String),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl CommandError {
    /// Text to reply with. Storage failures are not shown to users.
    pub fn reply_text(&self) -> String {
        match self {
            CommandError::Ledger(_) => GENERIC_FAILURE.to_string(),
            other => other.to_string(),
        }
    }
}

impl From<ParseError> for CommandError {
    fn from(err: ParseError) -> Self {
        CommandError::Invalid(err.to_string())
    }
}

pub type HandlerResult = Result<Vec<GatewayAction>, CommandError>;

/// Dependencies shared by all handlers.
pub struct HandlerContext<'a> {
    pub ledger: &'a Ledger,
    pub config: &'a Config,
    pub announcer: &'a Announcer,
}

/// Route a parsed command to its handler.
pub fn dispatch(
    ctx: &HandlerContext<'_>,
    views: &mut TeamViews,
    msg: &MessagePayload,
    command: Command,
) -> HandlerResult {
    match command {
        Command::Fine {
            target,
            amount,
            reason,
        } => fine(ctx, msg, target, amount, reason.as_deref()),
        Command::Bail { target, amount } => bail(ctx, msg, target, amount),
        Command::Teams => teams(ctx, views, msg),
        Command::Profile => profile(ctx, msg),
        Command::Sign { target, seasons } => sign(ctx, msg, target, seasons),
        Command::Release { target } => release(ctx, msg, target),
    }
}

// ---------------------------------------------------------------------------
// Fines
// ---------------------------------------------------------------------------

pub fn fine(
    ctx: &HandlerContext<'_>,
    msg: &MessagePayload,
    target: UserId,
    amount: i64,
    reason: Option<&str>,
) -> HandlerResult {
    if !ctx.config.permissions.may_issue_fines(&msg.member_roles) {
        return Err(CommandError::Unauthorized(
            "❌ You are not allowed to issue fines.".into(),
        ));
    }
    let amount = positive_amount(amount)?;

    let balance = match ctx.ledger.add_fine(target, amount) {
        Ok(balance) => balance,
        Err(LedgerError::BalanceOverflow { .. }) => {
            return Err(CommandError::Invalid(format!(
                "❌ That fine would push {}'s balance past the maximum of ${}.",
                mention(target),
                MAX_BALANCE
            )));
        }
        Err(e) => return Err(e.into()),
    };
    info!(
        "Fine issued: {} fined {} ${} (balance ${})",
        msg.author.id, target, amount, balance
    );

    let embed = Embed::new("🚨 Fine Issued", colors::RED)
        .description(format!(
            "**User:** {}\n**Amount:** `${}`\n**Reason:** {}\n**Issued by:** {}",
            mention(target),
            amount,
            reason.unwrap_or(DEFAULT_REASON),
            msg.author.mention()
        ))
        .timestamp_now();

    Ok(ctx.announcer.announce(Destination::Fines, embed).into_iter().collect())
}

pub fn bail(
    ctx: &HandlerContext<'_>,
    msg: &MessagePayload,
    target: UserId,
    amount: i64,
) -> HandlerResult {
    let amount = positive_amount(amount)?;

    let remaining = match ctx.ledger.reduce_fine(target, amount)? {
        BailOutcome::NoFines => {
            return Err(CommandError::NotFound(format!(
                "ℹ️ {} has no fines recorded.",
                mention(target)
            )));
        }
        BailOutcome::Reduced {
            previous,
            remaining,
        } => {
            info!(
                "Bail processed by {} for {}: ${} -> ${}",
                msg.author.id, target, previous, remaining
            );
            remaining
        }
    };

    let embed = Embed::new("🟦 Bail Processed", colors::BLUE)
        .description(format!(
            "**User:** {}\n**Bail Amount:** `${}`\n**Remaining Fine:** `${}`\n**Processed by:** {}",
            mention(target),
            amount,
            remaining,
            msg.author.mention()
        ))
        .timestamp_now();

    Ok(ctx.announcer.announce(Destination::Fines, embed).into_iter().collect())
}

fn positive_amount(amount: i64) -> Result<u64, CommandError> {
    u64::try_from(amount)
        .ok()
        .filter(|&a| a > 0)
        .ok_or_else(|| CommandError::Invalid("❌ Amount must be a positive whole number.".into()))
}

// ---------------------------------------------------------------------------
// Teams and rosters
// ---------------------------------------------------------------------------

/// Post a button per team with signed players. Selecting one is handled by
/// [`select_team`].
pub fn teams(ctx: &HandlerContext<'_>, views: &mut TeamViews, msg: &MessagePayload) -> HandlerResult {
    let teams = ctx.ledger.list_teams()?;
    if teams.is_empty() {
        return Ok(vec![GatewayAction::reply(msg.channel_id, NO_TEAMS_MESSAGE)]);
    }

    let buttons = views.open(teams);
    Ok(vec![GatewayAction::SendMessage {
        channel_id: msg.channel_id,
        message: OutgoingMessage::text(TEAM_PICKER_PROMPT).with_components(buttons),
    }])
}

/// Second step of the team picker: disable the buttons and show the chosen
/// roster to the selecting user only. The picker is used up only once the
/// roster has been read; later clicks on it do nothing.
pub fn select_team(
    ctx: &HandlerContext<'_>,
    views: &mut TeamViews,
    interaction: &InteractionPayload,
) -> HandlerResult {
    let team = match views.resolve(&interaction.custom_id) {
        Selection::Team(team) => team,
        Selection::AlreadyUsed => {
            debug!(
                "Ignoring repeat selection {} from {}",
                interaction.custom_id, interaction.user.id
            );
            return Ok(vec![]);
        }
        Selection::Unknown => {
            debug!("Ignoring unknown component {}", interaction.custom_id);
            return Ok(vec![]);
        }
    };

    let roster = ctx.ledger.list_roster_by_team(&team)?;
    let manager = ctx.ledger.manager_of_team(&team)?;
    views.mark_used(&interaction.custom_id);
    info!("{} viewed the {} roster", interaction.user.id, team);

    Ok(vec![
        GatewayAction::DisableComponents {
            channel_id: interaction.channel_id,
            message_id: interaction.message_id,
        },
        GatewayAction::EphemeralReply {
            interaction_id: interaction.interaction_id,
            message: OutgoingMessage::embed(roster_embed(&team, &roster, manager)),
        },
    ])
}

fn roster_embed(team: &str, roster: &[RosterEntry], manager: Option<UserId>) -> Embed {
    let manager_text = manager.map(mention).unwrap_or_else(|| "Unknown".into());
    let players = if roster.is_empty() {
        "No players signed.".to_string()
    } else {
        roster
            .iter()
            .map(|entry| mention(entry.user_id))
            .collect::<Vec<_>>()
            .join("\n")
    };

    Embed::new(format!("📋 {team} Roster"), colors::GOLD)
        .field("Manager", manager_text, false)
        .field("Players", players, false)
}

pub fn sign(
    ctx: &HandlerContext<'_>,
    msg: &MessagePayload,
    target: UserId,
    seasons: i64,
) -> HandlerResult {
    let seasons = u8::try_from(seasons)
        .ok()
        .filter(|s| (1..=MAX_SEASONS).contains(s))
        .ok_or_else(|| {
            CommandError::Invalid(format!("❌ Seasons must be between 1 and {MAX_SEASONS}."))
        })?;

    let proof = msg
        .attachments
        .iter()
        .find(|a| a.is_image())
        .ok_or_else(|| {
            CommandError::Invalid("❌ Please provide proof as an image attachment.".into())
        })?;

    let team = ctx
        .config
        .teams
        .resolve_team(&msg.member_roles)
        .ok_or_else(|| {
            CommandError::Unauthorized(
                "❌ You do not have a valid team role to use this command.".into(),
            )
        })?;

    match ctx.ledger.sign_player(target, team, msg.author.id, seasons) {
        Ok(()) => {}
        Err(LedgerError::AlreadySigned { team: current, .. }) => {
            return Err(CommandError::Invalid(format!(
                "❌ {} is already signed to **{}**. Release them first.",
                mention(target),
                current
            )));
        }
        Err(e) => return Err(e.into()),
    }
    info!(
        "{} signed {} to {} for {} season(s)",
        msg.author.id, target, team, seasons
    );

    let embed = Embed::new("✅ Player Signed!", colors::GREEN)
        .description(format!(
            "**{}** has joined **{}** for **{} season(s)**.\n📎 [View Proof]({})",
            mention(target),
            team,
            seasons,
            proof.url
        ))
        .timestamp_now();

    Ok(ctx
        .announcer
        .announce(Destination::Announcements, embed)
        .into_iter()
        .collect())
}

pub fn release(ctx: &HandlerContext<'_>, msg: &MessagePayload, target: UserId) -> HandlerResult {
    let team = ctx
        .config
        .teams
        .resolve_team(&msg.member_roles)
        .ok_or_else(|| CommandError::Unauthorized("❌ You are not a team manager.".into()))?;

    let not_signed = || {
        CommandError::NotFound(format!("ℹ️ {} is not signed to any team.", mention(target)))
    };
    let entry = ctx.ledger.roster_entry(target)?.ok_or_else(not_signed)?;
    if ctx.ledger.release_player(target)? == 0 {
        return Err(not_signed());
    }
    info!(
        "{} ({}) released {} from {}",
        msg.author.id, team, target, entry.team_name
    );

    let embed = Embed::new("⚠️ Player Released", colors::ORANGE)
        .description(format!(
            "**{}** has been released from **{}**.",
            mention(target),
            entry.team_name
        ))
        .timestamp_now();

    Ok(ctx
        .announcer
        .announce(Destination::Announcements, embed)
        .into_iter()
        .collect())
}

// ---------------------------------------------------------------------------
// Profile
// ---------------------------------------------------------------------------

pub fn profile(ctx: &HandlerContext<'_>, msg: &MessagePayload) -> HandlerResult {
    let user = &msg.author;
    let balance = ctx.ledger.fine_balance(user.id)?;
    let team = ctx.config.teams.resolve_team(&msg.member_roles);

    let fines_text = if balance > 0 {
        format!("${balance}")
    } else {
        "None".to_string()
    };

    let embed = Embed::new("📂 User Profile", colors::DARK_GREY)
        .thumbnail(user.avatar_url.clone())
        .field("Username", user.name.clone(), true)
        .field("User ID", user.id.to_string(), true)
        .field("Fines (Unpaid)", fines_text, false)
        .field("Team", team.unwrap_or("None"), true)
        .field("Free Agent", if team.is_some() { "No" } else { "Yes" }, true);

    Ok(vec![GatewayAction::SendMessage {
        channel_id: msg.channel_id,
        message: OutgoingMessage::embed(embed),
    }])
}

// ---------------------------------------------------------------------------
// Team picker registry
// ---------------------------------------------------------------------------

const VIEW_PREFIX: &str = "teams";

/// Open pickers kept before the oldest are forgotten.
const MAX_OPEN_VIEWS: usize = 256;

#[derive(Debug)]
struct TeamView {
    options: Vec<String>,
    used: bool,
}

/// Outcome of clicking a picker button.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    Team(String),
    /// The picker already served a selection.
    AlreadyUsed,
    /// Not a picker button, or the picker has been evicted.
    Unknown,
}

/// Maps button ids of the form `teams:<view>:<index>` to team names. Button
/// ids carry no team data, so a selection always resolves against the list
/// captured when the picker was posted.
#[derive(Debug, Default)]
pub struct TeamViews {
    next_id: u64,
    views: BTreeMap<u64, TeamView>,
}

impl TeamViews {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a picker for `teams` and return its buttons.
    pub fn open(&mut self, teams: Vec<String>) -> Vec<Button> {
        self.next_id += 1;
        let view_id = self.next_id;

        let buttons = teams
            .iter()
            .enumerate()
            .map(|(index, team)| Button {
                custom_id: format!("{VIEW_PREFIX}:{view_id}:{index}"),
                label: team.clone(),
                disabled: false,
            })
            .collect();

        self.views.insert(
            view_id,
            TeamView {
                options: teams,
                used: false,
            },
        );
        while self.views.len() > MAX_OPEN_VIEWS {
            self.views.pop_first();
        }

        buttons
    }

    /// Look up the team behind a button click without consuming the picker.
    pub fn resolve(&self, custom_id: &str) -> Selection {
        let Some((view_id, index)) = parse_custom_id(custom_id) else {
            return Selection::Unknown;
        };
        let Some(view) = self.views.get(&view_id) else {
            return Selection::Unknown;
        };
        if view.used {
            return Selection::AlreadyUsed;
        }
        match view.options.get(index) {
            Some(team) => Selection::Team(team.clone()),
            None => Selection::Unknown,
        }
    }

    /// Mark the picker owning `custom_id` as used.
    pub fn mark_used(&mut self, custom_id: &str) {
        if let Some(view) = parse_custom_id(custom_id).and_then(|(id, _)| self.views.get_mut(&id)) {
            view.used = true;
        }
    }

    pub fn len(&self) -> usize {
        self.views.len()
    }

    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }
}

fn parse_custom_id(custom_id: &str) -> Option<(u64, usize)> {
    let mut parts = custom_id.split(':');
    if parts.next()? != VIEW_PREFIX {
        return None;
    }
    let view_id = parts.next()?.parse().ok()?;
    let index = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some((view_id, index))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

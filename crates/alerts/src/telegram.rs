//! Telegram bot handlers.

use crate::commands::{
    parse_add, parse_close_call, parse_history_limit, parse_id, parse_open_call, parse_remind,
    parse_stop_loss, parse_ticker, AlertTarget, ArgError, DEL_USAGE, PRICE_USAGE,
};
use crate::db::{Database, DbError, NewAlert, NewCall};
use crate::messages::{
    alert_list, closed_call_message, leaderboard_line, open_call_line, price_info_message,
    symbol_activity_line, symbol_trades_line, trigger_line, user_stats_message,
};
use crate::reminder::{ReminderError, ReminderScheduler};
use crate::supervisor::MonitorSupervisor;
use pricewatch_core::{format_change, format_price, AlertCondition, Call};
use pricewatch_feeds::{FeedError, PriceGateway};
use std::collections::HashMap;
use std::sync::Arc;
use teloxide::prelude::*;
use teloxide::types::ParseMode;
use teloxide::utils::command::BotCommands;
use teloxide::utils::html::escape;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Telegram's limit on one message, in characters.
const MAX_MESSAGE_LEN: usize = 4096;

#[derive(Error, Debug)]
pub enum TelegramError {
    #[error("Telegram API error: {0}")]
    Api(#[from] teloxide::RequestError),
    #[error("Database error: {0}")]
    Db(#[from] DbError),
    #[error("{0}")]
    Feed(#[from] FeedError),
    #[error("{0}")]
    Reminder(#[from] ReminderError),
    #[error("{0}")]
    Args(#[from] ArgError),
}

/// Bot commands.
#[derive(BotCommands, Clone, Debug, PartialEq)]
#[command(rename_rule = "lowercase", description = "Available commands:")]
pub enum Command {
    #[command(description = "Show this list of commands")]
    Start,
    #[command(description = "Show help")]
    Help,
    #[command(description = "Show chat ID, user ID and username")]
    ChatId,
    #[command(description = "Create an alert. Usage: /add TICKER [price|pct] VALUE")]
    Add(String),
    #[command(description = "List the chat's alerts")]
    Alerts,
    #[command(description = "Delete an alert. Usage: /del ID")]
    Del(String),
    #[command(description = "Delete every alert of the chat")]
    ClearAllAlerts,
    #[command(description = "Price with 15m/1h/4h/24h changes. Usage: /p TICKER")]
    P(String),
    #[command(description = "Prices of every alert and call symbol of the chat")]
    AllP,
    #[command(description = "Open a call. Usage: /ocall TICKER [long|short] [deposit%] [sl PRICE]")]
    OCall(String),
    #[command(description = "Close a call. Usage: /ccall ID [size]")]
    CCall(String),
    #[command(description = "Set a stop-loss. Usage: /sl ID [price]")]
    Sl(String),
    #[command(description = "Your open calls with live P&L")]
    MyCalls,
    #[command(description = "Every open call, best P&L first")]
    AllCalls,
    #[command(description = "Close all your open calls at market")]
    Rush,
    #[command(description = "Trader leaderboard for 90 days")]
    CallStats,
    #[command(description = "Your call statistics for 90 days")]
    MyCallStats,
    #[command(description = "Your trades by symbol for 90 days")]
    MyTrades,
    #[command(description = "Triggered alerts. Usage: /history [N]")]
    History(String),
    #[command(description = "Alert statistics by symbol")]
    Stats,
    #[command(description = "Remind to check a chart. Usage: /remind TICKER 5m|2h|3d [text]")]
    Remind(String),
}

/// Who sent a command, and where.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandContext {
    pub chat_id: i64,
    pub user_id: i64,
    pub username: String,
}

impl CommandContext {
    pub fn from_message(msg: &Message) -> Self {
        let (user_id, username) = match msg.from.as_ref() {
            Some(user) => (
                user.id.0 as i64,
                user.username
                    .clone()
                    .unwrap_or_else(|| user.first_name.clone()),
            ),
            None => (msg.chat.id.0, String::new()),
        };
        Self {
            chat_id: msg.chat.id.0,
            user_id,
            username,
        }
    }
}

/// Telegram bot wrapper.
pub struct TelegramBot {
    bot: Bot,
    db: Database,
    gateway: PriceGateway,
    supervisor: Arc<MonitorSupervisor>,
    reminders: ReminderScheduler,
}

impl TelegramBot {
    pub fn new(
        bot: Bot,
        db: Database,
        gateway: PriceGateway,
        supervisor: Arc<MonitorSupervisor>,
        reminders: ReminderScheduler,
    ) -> Self {
        Self {
            bot,
            db,
            gateway,
            supervisor,
            reminders,
        }
    }

    /// Get the underlying bot for sending messages.
    pub fn bot(&self) -> &Bot {
        &self.bot
    }

    /// Run the bot command handler until `shutdown` is cancelled.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let bot = self.bot.clone();
        let handler = Update::filter_message().filter_command::<Command>().endpoint(
            move |bot: Bot, msg: Message, cmd: Command| {
                let this = Arc::clone(&self);
                async move { this.handle_command(bot, msg, cmd).await }
            },
        );

        let mut dispatcher = Dispatcher::builder(bot, handler).build();
        let token = dispatcher.shutdown_token();
        tokio::spawn(async move {
            shutdown.cancelled().await;
            if let Ok(stopped) = token.shutdown() {
                stopped.await;
            }
        });

        info!("Telegram dispatcher started");
        dispatcher.dispatch().await;
        info!("Telegram dispatcher stopped");
    }

    async fn handle_command(
        &self,
        bot: Bot,
        msg: Message,
        cmd: Command,
    ) -> Result<(), TelegramError> {
        let ctx = CommandContext::from_message(&msg);
        debug!(chat_id = ctx.chat_id, user_id = ctx.user_id, command = ?cmd, "Command received");

        let reply = match self.execute(&ctx, cmd).await {
            Ok(reply) => reply,
            Err(TelegramError::Api(e)) => return Err(e.into()),
            Err(TelegramError::Args(e)) => escape(&e.to_string()),
            Err(e) => {
                warn!(chat_id = ctx.chat_id, error = %e, "Command failed");
                format!("Error: {}", escape(&e.to_string()))
            }
        };

        for chunk in split_message(&reply, MAX_MESSAGE_LEN) {
            bot.send_message(msg.chat.id, chunk)
                .parse_mode(ParseMode::Html)
                .await?;
        }
        Ok(())
    }

    /// Run one command and build its HTML reply.
    pub async fn execute(
        &self,
        ctx: &CommandContext,
        cmd: Command,
    ) -> Result<String, TelegramError> {
        match cmd {
            Command::Start | Command::Help => Ok(escape(&Command::descriptions().to_string())),
            Command::ChatId => Ok(format!(
                "Chat ID: <code>{}</code>\nUser ID: <code>{}</code>\nUsername: {}",
                ctx.chat_id,
                ctx.user_id,
                escape(&ctx.username)
            )),
            Command::Add(args) => self.add_alert(ctx, &args).await,
            Command::Alerts => Ok(alert_list(&self.db.alerts_by_chat(ctx.chat_id).await?)),
            Command::Del(args) => self.delete_alert(ctx, &args).await,
            Command::ClearAllAlerts => self.clear_alerts(ctx).await,
            Command::P(args) => self.price(&args).await,
            Command::AllP => self.all_prices(ctx).await,
            Command::OCall(args) => self.open_call(ctx, &args).await,
            Command::CCall(args) => self.close_call(ctx, &args).await,
            Command::Sl(args) => self.set_stop_loss(ctx, &args).await,
            Command::MyCalls => self.my_calls(ctx).await,
            Command::AllCalls => self.all_calls().await,
            Command::Rush => self.rush(ctx).await,
            Command::CallStats => self.call_stats().await,
            Command::MyCallStats => self.my_call_stats(ctx).await,
            Command::MyTrades => self.my_trades(ctx).await,
            Command::History(args) => self.history(ctx, &args).await,
            Command::Stats => self.alert_stats(ctx).await,
            Command::Remind(args) => self.remind(ctx, &args).await,
        }
    }

    async fn add_alert(&self, ctx: &CommandContext, args: &str) -> Result<String, TelegramError> {
        let args = parse_add(args)?;
        let preferred = self.db.preferred_source(&args.symbol).await?;
        let quote = self.gateway.current_price(&args.symbol, preferred).await?;

        let condition = match args.target {
            AlertTarget::Price(target) => AlertCondition::Price { target },
            AlertTarget::Percent(target_pct) => AlertCondition::Percent {
                target_pct,
                base: quote.price,
            },
        };
        let alert = self
            .db
            .add_alert(NewAlert {
                chat_id: ctx.chat_id,
                user_id: ctx.user_id,
                username: ctx.username.clone(),
                symbol: args.symbol.clone(),
                condition,
                source: Some(quote.source),
            })
            .await?;
        info!(alert_id = %alert.id, symbol = %alert.symbol, chat_id = ctx.chat_id, "Alert created");
        self.supervisor.restart().await;

        let goal = match condition {
            AlertCondition::Price { target } => format!("reaches {}", format_price(target)),
            AlertCondition::Percent { target_pct, base } => format!(
                "moves {} from {}",
                format_change(target_pct),
                format_price(base)
            ),
        };
        Ok(format!(
            "Alert created (ID: <code>{}</code>)\n{} on {} {} (current: {})",
            alert.id,
            escape(&alert.symbol),
            quote.source,
            goal,
            format_price(quote.price)
        ))
    }

    async fn delete_alert(&self, ctx: &CommandContext, args: &str) -> Result<String, TelegramError> {
        let id = parse_id(args, DEL_USAGE)?;
        if !self.db.delete_alert(ctx.chat_id, &id).await? {
            return Ok("Alert not found.".to_string());
        }
        self.supervisor.restart().await;
        Ok(format!("Alert <code>{}</code> deleted.", escape(&id)))
    }

    async fn clear_alerts(&self, ctx: &CommandContext) -> Result<String, TelegramError> {
        let count = self.db.delete_all_alerts(ctx.chat_id).await?;
        if count > 0 {
            self.supervisor.restart().await;
        }
        Ok(format!("Deleted alerts: {count}"))
    }

    async fn price(&self, args: &str) -> Result<String, TelegramError> {
        let symbol = parse_ticker(args, PRICE_USAGE)?;
        let preferred = self.db.preferred_source(&symbol).await?;
        let info = self.gateway.price_info(&symbol, preferred).await?;
        Ok(price_info_message(&symbol, &info))
    }

    async fn all_prices(&self, ctx: &CommandContext) -> Result<String, TelegramError> {
        let symbols = self.db.symbols_for_chat(ctx.chat_id).await?;
        if symbols.is_empty() {
            return Ok("No active alerts or calls.".to_string());
        }

        let mut blocks = Vec::with_capacity(symbols.len());
        for symbol in &symbols {
            let preferred = self.db.preferred_source(symbol).await?;
            match self.gateway.price_info(symbol, preferred).await {
                Ok(info) => blocks.push(price_info_message(symbol, &info)),
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "Failed to fetch price info");
                    blocks.push(format!("<b>{}</b>: price unavailable", escape(symbol)));
                }
            }
        }
        Ok(blocks.join("\n\n"))
    }

    async fn open_call(&self, ctx: &CommandContext, args: &str) -> Result<String, TelegramError> {
        let args = parse_open_call(args)?;
        let preferred = self.db.preferred_source(&args.symbol).await?;
        let quote = self.gateway.current_price(&args.symbol, preferred).await?;

        let call = self
            .db
            .open_call(NewCall {
                user_id: ctx.user_id,
                username: ctx.username.clone(),
                chat_id: ctx.chat_id,
                symbol: args.symbol,
                source: Some(quote.source),
                direction: args.direction,
                entry_price: quote.price,
                deposit_percent: args.deposit_percent,
                stop_loss: args.stop_loss,
            })
            .await?;

        let mut reply = format!(
            "Call opened\nID: <code>{}</code>\n{} {} @ {}",
            call.id,
            escape(&call.symbol),
            call.direction.label(),
            format_price(call.entry_price)
        );
        if call.deposit_percent > 0.0 {
            reply.push_str(&format!("\nDeposit: {:.0}%", call.deposit_percent));
        }
        if call.has_stop_loss() {
            reply.push_str(&format!("\nStop-loss: {}", format_price(call.stop_loss)));
        }
        reply.push_str(&format!("\nSource: {}", quote.source));
        Ok(reply)
    }

    async fn close_call(&self, ctx: &CommandContext, args: &str) -> Result<String, TelegramError> {
        let args = parse_close_call(args)?;
        let Some(call) = self.db.call_by_id(&args.id, ctx.user_id).await? else {
            return Ok("Call not found or not yours.".to_string());
        };
        if !call.is_open() {
            return Ok("Call is already closed.".to_string());
        }
        let size = args.size.unwrap_or(call.size);
        if size > call.size {
            return Ok(format!(
                "Size must be above 0 and at most the remaining {:.0}.",
                call.size
            ));
        }

        let quote = self.gateway.current_price(&call.symbol, call.source).await?;
        let updated = self
            .db
            .close_call(&call.id, ctx.user_id, quote.price, size)
            .await?;
        debug!(call_id = %updated.id, size = size, price = quote.price, "Manual close applied");
        Ok(closed_call_message(&updated, size))
    }

    async fn set_stop_loss(&self, ctx: &CommandContext, args: &str) -> Result<String, TelegramError> {
        let args = parse_stop_loss(args)?;
        let Some(call) = self.db.call_by_id(&args.id, ctx.user_id).await? else {
            return Ok("Call not found or not yours.".to_string());
        };
        if !call.is_open() {
            return Ok("Cannot set a stop-loss on a closed call.".to_string());
        }

        let price = args.price.unwrap_or(call.entry_price);
        self.db
            .update_stop_loss(&call.id, ctx.user_id, price)
            .await?;

        Ok(match args.price {
            Some(p) if p == 0.0 => format!("Stop-loss of call <code>{}</code> removed.", call.id),
            Some(p) => format!(
                "Stop-loss of call <code>{}</code> set to {}.",
                call.id,
                format_price(p)
            ),
            None => format!(
                "Stop-loss of call <code>{}</code> set to the entry price {}.",
                call.id,
                format_price(price)
            ),
        })
    }

    async fn current_price(&self, call: &Call) -> Option<f64> {
        match self.gateway.current_price(&call.symbol, call.source).await {
            Ok(quote) => Some(quote.price),
            Err(e) => {
                warn!(symbol = %call.symbol, call_id = %call.id, error = %e, "Failed to get price for call");
                None
            }
        }
    }

    async fn my_calls(&self, ctx: &CommandContext) -> Result<String, TelegramError> {
        let calls = self.db.calls_by_user(ctx.user_id, true).await?;
        if calls.is_empty() {
            return Ok("You have no open calls.".to_string());
        }

        let mut reply = String::from("<b>Your open calls</b>\n");
        let mut exposure = 0.0;
        let mut contribution = 0.0;
        for (i, call) in calls.iter().enumerate() {
            let price = self.current_price(call).await;
            if let Some(price) = price {
                if call.deposit_percent > 0.0 {
                    exposure += call.open_deposit_percent();
                    contribution += call.deposit_contribution(price);
                }
            }
            reply.push_str(&format!("\n{}. {}", i + 1, open_call_line(call, price)));
        }

        if exposure > 0.0 {
            reply.push_str(&format!(
                "\n\nTotal position size: {:.0}%\nP&amp;L on deposit: {}",
                exposure,
                format_change(contribution)
            ));
        }
        Ok(reply)
    }

    async fn all_calls(&self) -> Result<String, TelegramError> {
        let calls = self.db.all_open_calls().await?;
        if calls.is_empty() {
            return Ok("No open calls.".to_string());
        }

        let mut valued = Vec::with_capacity(calls.len());
        for call in calls {
            if let Some(price) = self.current_price(&call).await {
                let pnl = call.unrealized_pnl(price);
                valued.push((call, price, pnl));
            }
        }
        valued.sort_by(|a, b| b.2.total_cmp(&a.2));

        let mut reply = String::from("<b>All open calls by P&amp;L</b>\n");
        for (i, (call, price, pnl)) in valued.iter().enumerate() {
            reply.push_str(&format!(
                "\n{}. {} {} {} @ {} now {} P&amp;L {}",
                i + 1,
                escape(&display_name(&call.username, call.user_id)),
                escape(&call.symbol),
                call.direction.label(),
                format_price(call.entry_price),
                format_price(*price),
                format_change(*pnl)
            ));
        }
        Ok(reply)
    }

    async fn rush(&self, ctx: &CommandContext) -> Result<String, TelegramError> {
        let calls = self.db.calls_by_user(ctx.user_id, true).await?;
        if calls.is_empty() {
            return Ok("You have no open calls to close.".to_string());
        }

        let mut closed = 0;
        let mut failures = Vec::new();
        for call in &calls {
            let result = match self.gateway.current_price(&call.symbol, call.source).await {
                Ok(quote) => self
                    .db
                    .close_call(&call.id, ctx.user_id, quote.price, call.size)
                    .await
                    .map_err(TelegramError::from),
                Err(e) => Err(e.into()),
            };
            match result {
                Ok(_) => closed += 1,
                Err(e) => {
                    warn!(call_id = %call.id, error = %e, "Failed to close call on rush");
                    failures.push(format!(
                        "<code>{}</code> ({}): {}",
                        call.id,
                        escape(&call.symbol),
                        escape(&e.to_string())
                    ));
                }
            }
        }
        info!(user_id = ctx.user_id, closed = closed, failed = failures.len(), "Rush close finished");

        let mut reply = format!("Closed: {closed}\nFailed: {}", failures.len());
        if !failures.is_empty() {
            reply.push_str("\n\n");
            reply.push_str(&failures.join("\n"));
        }
        Ok(reply)
    }

    async fn call_stats(&self) -> Result<String, TelegramError> {
        let mut stats: Vec<_> = self
            .db
            .all_user_stats()
            .await?
            .into_iter()
            .filter(|s| s.total_calls > 0)
            .collect();
        if stats.is_empty() {
            return Ok("No statistics yet.".to_string());
        }
        stats.sort_by(|a, b| {
            b.deposit
                .return_percent()
                .total_cmp(&a.deposit.return_percent())
        });

        let mut open_calls: HashMap<i64, usize> = HashMap::new();
        for call in self.db.all_open_calls().await? {
            *open_calls.entry(call.user_id).or_default() += 1;
        }

        let mut reply = String::from("📊 <b>Trader leaderboard (90 days)</b>\n");
        for (i, s) in stats.iter().enumerate() {
            let open = open_calls.get(&s.user_id).copied().unwrap_or(0);
            reply.push('\n');
            reply.push_str(&leaderboard_line(i + 1, s, open));
        }
        Ok(reply)
    }

    async fn my_call_stats(&self, ctx: &CommandContext) -> Result<String, TelegramError> {
        let stats = self.db.user_stats(ctx.user_id).await?;
        let open = self.db.calls_by_user(ctx.user_id, true).await?;
        if stats.closed_calls == 0 && open.is_empty() {
            return Ok("You have no closed or open calls in the last 90 days.".to_string());
        }

        let mut reply = user_stats_message(&stats);
        reply.push_str(&format!("\nOpen calls: {}", open.len()));

        let (best, worst) = self.db.best_worst_calls(ctx.user_id).await?;
        for (label, call) in [("Best call", best), ("Worst call", worst)] {
            if let Some(call) = call {
                reply.push_str(&format!(
                    "\n{}: {} ({} {})",
                    label,
                    format_change(call.pnl_percent),
                    escape(&call.symbol),
                    call.direction.label()
                ));
            }
        }
        Ok(reply)
    }

    async fn my_trades(&self, ctx: &CommandContext) -> Result<String, TelegramError> {
        let trades: Vec<_> = self
            .db
            .trades_by_symbol(ctx.user_id)
            .await?
            .into_iter()
            .filter(|t| t.closed_calls > 0)
            .collect();
        if trades.is_empty() {
            return Ok("You have no closed trades in the last 90 days.".to_string());
        }

        let mut reply = String::from("📈 <b>Your trades by symbol (90 days)</b>\n");
        for trade in &trades {
            reply.push('\n');
            reply.push_str(&symbol_trades_line(trade));
        }
        Ok(reply)
    }

    async fn history(&self, ctx: &CommandContext, args: &str) -> Result<String, TelegramError> {
        let limit = parse_history_limit(args);
        let triggers = self.db.trigger_history(ctx.chat_id, limit).await?;
        if triggers.is_empty() {
            return Ok("No triggered alerts yet.".to_string());
        }

        let mut reply = format!("<b>Last {} triggers</b>\n", triggers.len());
        for trigger in &triggers {
            reply.push('\n');
            reply.push_str(&trigger_line(trigger));
        }
        Ok(reply)
    }

    async fn alert_stats(&self, ctx: &CommandContext) -> Result<String, TelegramError> {
        let activity = self.db.symbol_activity(ctx.user_id).await?;
        if activity.is_empty() {
            return Ok("No statistics yet.".to_string());
        }

        let mut reply = String::from("<b>Alerts by symbol</b>\n");
        for (i, a) in activity.iter().enumerate() {
            reply.push_str(&format!("\n{}. {}", i + 1, symbol_activity_line(a)));
        }
        let active: i64 = activity.iter().map(|a| a.active_alerts).sum();
        reply.push_str(&format!(
            "\n\nActive alerts: {}\nSymbols: {}",
            active,
            activity.len()
        ));
        Ok(reply)
    }

    async fn remind(&self, ctx: &CommandContext, args: &str) -> Result<String, TelegramError> {
        let args = parse_remind(args)?;
        let reminder = self
            .reminders
            .add(
                ctx.chat_id,
                ctx.user_id,
                &ctx.username,
                &args.symbol,
                &args.text,
                args.after,
            )
            .await?;
        Ok(format!(
            "I will remind you about {} at {} (id <code>{}</code>)",
            escape(&reminder.symbol),
            reminder.trigger_at.format("%H:%M %d.%m UTC"),
            reminder.id
        ))
    }
}

fn display_name(username: &str, user_id: i64) -> String {
    if username.is_empty() {
        format!("User_{user_id}")
    } else {
        username.to_string()
    }
}

/// Split `text` on line boundaries into chunks of at most `limit` chars.
///
/// A single line longer than the limit is cut at char boundaries.
pub fn split_message(text: &str, limit: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for line in text.split('\n') {
        let line_len = line.chars().count();
        let sep = usize::from(!current.is_empty());
        if current_len + sep + line_len > limit && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }

        if line_len > limit {
            let chars: Vec<char> = line.chars().collect();
            for piece in chars.chunks(limit) {
                chunks.push(piece.iter().collect());
            }
            continue;
        }

        if !current.is_empty() {
            current.push('\n');
            current_len += 1;
        }
        current.push_str(line);
        current_len += line_len;
    }

    if !current.is_empty() || chunks.is_empty() {
        chunks.push(current);
    }
    chunks
}

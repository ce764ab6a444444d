use std::fmt::Write as _;
use std::fs;
use std::io::{self, IsTerminal, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand, ValueEnum};
use time::{OffsetDateTime, UtcOffset};

use crate::config::{AppConfig, ConfigPaths, ThemeName};
use crate::editor::{EditorSession, FormatKind};
use crate::notes::{NoteBook, NoteCard, NoteFilter};
use crate::notify::{
    confirm_reminder, DeletedItem, NotificationCenter, ReminderScheduler, UndoLedger,
};
use crate::offline::{
    parse_origin, CacheController, CacheStorage, ConsoleHost, DirectoryNetwork, HttpNetwork,
    Network, Registration, Request, Response, SqliteCacheStorage,
};
use crate::storage::{NoteRecord, Priority, StorageHandle, TodoRecord};
use crate::text;
use crate::todos::{self, TodoFilter, TodoList};

/// Everything a command handler needs, built once per invocation.
pub struct AppContext {
    pub config: Arc<AppConfig>,
    pub paths: ConfigPaths,
    pub storage: StorageHandle,
    pub center: Arc<NotificationCenter>,
    pub runtime: tokio::runtime::Runtime,
}

impl AppContext {
    fn ledger(&self) -> UndoLedger {
        UndoLedger::new(
            self.storage.clone(),
            self.config.notifications.undo_window(),
        )
    }

    fn todo_list(&self) -> TodoList {
        TodoList::new(self.storage.clone(), self.ledger())
    }

    fn note_book(&self) -> NoteBook {
        NoteBook::new(self.storage.clone(), self.ledger())
    }
}

#[derive(Args, Debug, Clone)]
pub struct TodoArgs {
    #[command(subcommand)]
    pub command: TodoCommand,
}

#[derive(Subcommand, Debug, Clone)]
pub enum TodoCommand {
    /// Add a task
    Add(TodoAddArgs),
    /// List tasks
    List(TodoListArgs),
    /// Change an existing task
    Edit(TodoEditArgs),
    /// Flip a task between done and open
    Toggle(IdArgs),
    /// Delete a task (undo with `spaila undo`)
    Delete(IdArgs),
    /// Stay running and fire reminders as they come due
    Watch,
}

#[derive(Args, Debug, Clone)]
pub struct TodoAddArgs {
    pub title: String,
    #[arg(long, default_value_t = Priority::Medium)]
    pub priority: Priority,
    /// Due date, YYYY-MM-DD
    #[arg(long)]
    pub date: Option<String>,
    /// Due time, HH:MM
    #[arg(long)]
    pub time: Option<String>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct TodoListArgs {
    #[arg(long, default_value_t = TodoFilter::All)]
    pub filter: TodoFilter,
}

#[derive(Args, Debug, Clone)]
pub struct TodoEditArgs {
    pub id: String,
    #[arg(long)]
    pub title: Option<String>,
    #[arg(long)]
    pub priority: Option<Priority>,
    /// New due date; pass an empty string to clear it
    #[arg(long)]
    pub date: Option<String>,
    /// New due time; pass an empty string to clear it
    #[arg(long)]
    pub time: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct IdArgs {
    pub id: String,
}

#[derive(Args, Debug, Clone)]
pub struct NoteArgs {
    #[command(subcommand)]
    pub command: NoteCommand,
}

#[derive(Subcommand, Debug, Clone)]
pub enum NoteCommand {
    /// List notes with previews
    List(NoteListArgs),
    /// Print one note
    Show(IdArgs),
    /// Write a new note. The body is read from stdin when not given.
    New(NoteWriteArgs),
    /// Change an existing note
    Edit(NoteEditArgs),
    /// Export a note as plain text
    Export(NoteExportArgs),
    /// Create a note from a text file (first line is the title)
    Import(NoteImportArgs),
    /// Flip the achieved flag of a note
    Achieve(IdArgs),
    /// Delete a note (undo with `spaila undo`)
    Delete(IdArgs),
}

#[derive(Args, Debug, Clone, Default)]
pub struct NoteListArgs {
    #[arg(long, default_value_t = NoteFilter::All)]
    pub filter: NoteFilter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FormatArg {
    Bold,
    Italic,
    Underline,
}

#[derive(Args, Debug, Clone, Default)]
pub struct NoteWriteArgs {
    #[arg(long)]
    pub title: Option<String>,
    /// Content markup
    #[arg(long)]
    pub body: Option<String>,
    /// Wrap the whole content in a style
    #[arg(long, value_enum)]
    pub format: Vec<FormatArg>,
    /// Wrap the whole content in a font size (1-7)
    #[arg(long)]
    pub font_size: Option<u8>,
    /// Attach a file
    #[arg(long = "attach", value_name = "PATH")]
    pub attach: Vec<PathBuf>,
    /// Close the editor without saving; the draft is kept only when
    /// `editor.autosave_on_close` is on
    #[arg(long)]
    pub no_save: bool,
}

#[derive(Args, Debug, Clone)]
pub struct NoteEditArgs {
    pub id: String,
    #[command(flatten)]
    pub write: NoteWriteArgs,
    /// Remove an attachment by id
    #[arg(long, value_name = "ATTACHMENT_ID")]
    pub remove_attachment: Vec<String>,
    /// Step back through this session's edits before saving
    #[arg(long, default_value_t = 0)]
    pub undo: usize,
    /// Step forward again after undoing
    #[arg(long, default_value_t = 0)]
    pub redo: usize,
}

#[derive(Args, Debug, Clone)]
pub struct NoteExportArgs {
    pub id: String,
    /// Target directory (defaults to the data directory's exports folder)
    #[arg(long)]
    pub out: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct NoteImportArgs {
    pub file: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct ThemeArgs {
    #[command(subcommand)]
    pub command: Option<ThemeCommand>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum ThemeCommand {
    /// Print the active theme (default)
    Show,
    /// Save a theme
    Set { theme: ThemeName },
    /// Switch between dark and light
    Toggle,
}

#[derive(Args, Debug, Clone)]
pub struct OfflineArgs {
    #[command(subcommand)]
    pub command: OfflineCommand,
}

#[derive(Subcommand, Debug, Clone)]
pub enum OfflineCommand {
    /// Install the configured cache version and drop older ones
    Install(SiteArgs),
    /// Fetch a URL through the cache
    Fetch(OfflineFetchArgs),
    /// List cache buckets
    Status,
    /// Show a push notification
    Push(PushArgs),
}

#[derive(Args, Debug, Clone, Default)]
pub struct SiteArgs {
    /// Serve assets from a local directory instead of the configured origin
    #[arg(long)]
    pub site: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct OfflineFetchArgs {
    pub url: String,
    #[command(flatten)]
    pub site: SiteArgs,
    /// Write the response body to stdout
    #[arg(long)]
    pub body: bool,
}

#[derive(Args, Debug, Clone)]
pub struct PushArgs {
    pub message: Option<String>,
}

pub fn handle_todo_command(ctx: &AppContext, args: TodoArgs) -> Result<()> {
    match args.command {
        TodoCommand::Add(args) => todo_add(ctx, args),
        TodoCommand::List(args) => {
            let list = ctx.todo_list();
            let output = format_todos(
                &list.visible(args.filter),
                args.filter,
                text::now_local(),
                text::local_offset(),
            );
            println!("{output}");
            Ok(())
        }
        TodoCommand::Edit(args) => todo_edit(ctx, args),
        TodoCommand::Toggle(args) => {
            match ctx.todo_list().toggle_complete(&args.id) {
                Some(true) => ctx.center.info("Task completed!"),
                Some(false) => ctx.center.info("Task marked as incomplete"),
                None => bail!("task {} not found", args.id),
            }
            Ok(())
        }
        TodoCommand::Delete(args) => {
            if !ctx.todo_list().delete(&args.id, text::now_local()) {
                bail!("could not delete task {}", args.id);
            }
            ctx.center.offer_undo("Task deleted");
            Ok(())
        }
        TodoCommand::Watch => todo_watch(ctx),
    }
}

fn todo_add(ctx: &AppContext, args: TodoAddArgs) -> Result<()> {
    let mut list = ctx.todo_list();
    let mut form = list.begin_create();
    form.title = args.title;
    form.priority = args.priority;
    form.date = args.date.unwrap_or_default();
    form.time = args.time.unwrap_or_default();
    validate_slot(&form.date, &form.time)?;

    let now = text::now_local();
    let Some(outcome) = list.submit(form, now) else {
        bail!("task title cannot be empty");
    };
    ctx.center.info(outcome.message());
    if let Some(reminder) = outcome.reminder(text::local_offset(), now) {
        if confirm_reminder(&ctx.center, &reminder, now).is_some() {
            println!("Keep `spaila todo watch` running to be notified.");
        }
    }
    Ok(())
}

fn todo_edit(ctx: &AppContext, args: TodoEditArgs) -> Result<()> {
    let mut list = ctx.todo_list();
    let Some(mut form) = list.begin_edit(&args.id) else {
        bail!("task {} not found", args.id);
    };
    if let Some(title) = args.title {
        form.title = title;
    }
    if let Some(priority) = args.priority {
        form.priority = priority;
    }
    if let Some(date) = args.date {
        form.date = date;
    }
    if let Some(time) = args.time {
        form.time = time;
    }
    validate_slot(&form.date, &form.time)?;

    let now = text::now_local();
    let Some(outcome) = list.submit(form, now) else {
        bail!("task {} was not updated", args.id);
    };
    ctx.center.info(outcome.message());
    Ok(())
}

fn validate_slot(date: &str, time: &str) -> Result<()> {
    let date = date.trim();
    let time = time.trim();
    if !date.is_empty() && text::parse_date(date).is_none() {
        bail!("date must look like YYYY-MM-DD, got {date:?}");
    }
    if !time.is_empty() && text::parse_time(time).is_none() {
        bail!("time must look like HH:MM, got {time:?}");
    }
    Ok(())
}

fn todo_watch(ctx: &AppContext) -> Result<()> {
    let list = ctx.todo_list();
    let now = text::now_local();
    let reminders = list.reminders(text::local_offset(), now);
    ctx.runtime.block_on(async {
        let mut scheduler = ReminderScheduler::new(ctx.center.clone());
        for reminder in reminders {
            scheduler.schedule(reminder, now);
        }
        if scheduler.pending() == 0 {
            println!("No upcoming reminders.");
            return;
        }
        println!("Waiting for {} reminder(s)...", scheduler.pending());
        scheduler.wait_all().await;
    });
    Ok(())
}

pub fn handle_note_command(ctx: &AppContext, args: NoteArgs) -> Result<()> {
    match args.command {
        NoteCommand::List(args) => {
            let book = ctx.note_book();
            let output = format_note_cards(
                &book.cards(args.filter),
                args.filter,
                book.count(),
                book.progress_percent(),
            );
            println!("{output}");
            Ok(())
        }
        NoteCommand::Show(args) => {
            let Some(note) = ctx.note_book().get(&args.id) else {
                bail!("note {} not found", args.id);
            };
            println!("{}", format_note(&note));
            Ok(())
        }
        NoteCommand::New(args) => note_new(ctx, args),
        NoteCommand::Edit(args) => note_edit(ctx, args),
        NoteCommand::Export(args) => note_export(ctx, args),
        NoteCommand::Import(args) => note_import(ctx, args),
        NoteCommand::Achieve(args) => {
            match ctx.note_book().toggle_achieved(&args.id) {
                Some(true) => ctx.center.info("Note marked as achieved!"),
                Some(false) => ctx.center.info("Note removed from achieved"),
                None => bail!("note {} not found", args.id),
            }
            Ok(())
        }
        NoteCommand::Delete(args) => {
            if !ctx.note_book().delete(&args.id, text::now_local()) {
                bail!("could not delete note {}", args.id);
            }
            ctx.center.offer_undo("Note deleted");
            Ok(())
        }
    }
}

fn note_new(ctx: &AppContext, mut args: NoteWriteArgs) -> Result<()> {
    if args.body.is_none() {
        args.body = read_stdin()?;
    }
    let mut session = EditorSession::open(&ctx.storage, None, ctx.config.editor.history_depth);
    apply_writes(&mut session, &args)?;
    finish_session(ctx, session, !args.no_save)
}

fn note_edit(ctx: &AppContext, args: NoteEditArgs) -> Result<()> {
    if ctx.note_book().get(&args.id).is_none() {
        bail!("note {} not found", args.id);
    }
    let mut session = EditorSession::open(
        &ctx.storage,
        Some(&args.id),
        ctx.config.editor.history_depth,
    );
    apply_writes(&mut session, &args.write)?;
    for attachment_id in &args.remove_attachment {
        if !session.remove_attachment(attachment_id) {
            tracing::warn!(%attachment_id, "no such attachment on this note");
        }
    }
    for _ in 0..args.undo {
        if !session.undo() {
            break;
        }
    }
    for _ in 0..args.redo {
        if !session.redo() {
            break;
        }
    }
    finish_session(ctx, session, !args.write.no_save)
}

fn apply_writes(session: &mut EditorSession, args: &NoteWriteArgs) -> Result<()> {
    if let Some(title) = &args.title {
        session.set_title(title.clone());
    }
    if let Some(body) = &args.body {
        session.set_content(body.clone());
    }
    for format in &args.format {
        let kind = match format {
            FormatArg::Bold => FormatKind::Bold,
            FormatArg::Italic => FormatKind::Italic,
            FormatArg::Underline => FormatKind::Underline,
        };
        session.apply_format(kind, None);
    }
    if let Some(size) = args.font_size {
        session.apply_format(FormatKind::FontSize(size), None);
    }
    for path in &args.attach {
        let attachment = session.attach_file(path)?;
        println!("Attached {} ({})", attachment.name, attachment.mime_type);
    }
    Ok(())
}

fn finish_session(ctx: &AppContext, mut session: EditorSession, save: bool) -> Result<()> {
    let summary = format!(
        "{} words, {} attachment(s)",
        session.word_count(),
        session.attachments().len()
    );
    if save {
        if !session.save(&ctx.storage) {
            bail!("Failed to save note. Please try again.");
        }
        ctx.center.info("Note saved successfully");
    } else {
        let autosave = ctx.config.editor.autosave_on_close;
        if !session.close(&ctx.storage, autosave) {
            bail!("Failed to save draft. Please try again.");
        }
        if !autosave {
            println!("Closed without saving.");
            return Ok(());
        }
    }
    println!("{summary}");
    Ok(())
}

fn note_export(ctx: &AppContext, args: NoteExportArgs) -> Result<()> {
    if ctx.note_book().get(&args.id).is_none() {
        bail!("note {} not found", args.id);
    }
    let session = EditorSession::open(
        &ctx.storage,
        Some(&args.id),
        ctx.config.editor.history_depth,
    );
    let exported = session.export();
    let dir = args.out.unwrap_or_else(|| ctx.paths.export_dir.clone());
    let path = write_export(&dir, &exported.filename, &exported.contents)?;
    println!("Exported to {}", path.display());
    Ok(())
}

fn write_export(dir: &Path, filename: &str, contents: &str) -> Result<PathBuf> {
    fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    let path = dir.join(filename);
    fs::write(&path, contents).with_context(|| format!("writing {}", path.display()))?;
    Ok(path)
}

fn note_import(ctx: &AppContext, args: NoteImportArgs) -> Result<()> {
    let raw = fs::read_to_string(&args.file)
        .with_context(|| format!("reading {}", args.file.display()))?;
    let mut session = EditorSession::open(&ctx.storage, None, ctx.config.editor.history_depth);
    session.import(&raw);
    if !session.save(&ctx.storage) {
        bail!("Failed to save note. Please try again.");
    }
    ctx.center.info("Note imported successfully");
    Ok(())
}

fn read_stdin() -> Result<Option<String>> {
    if io::stdin().is_terminal() {
        return Ok(None);
    }
    let mut buf = String::new();
    io::stdin().read_to_string(&mut buf)?;
    Ok(Some(buf))
}

pub fn undo_last(ctx: &AppContext) -> Result<()> {
    match ctx.ledger().undo(text::now_local()) {
        Some(DeletedItem::Note(_)) => ctx.center.info("Note restored"),
        Some(DeletedItem::Todo(_)) => ctx.center.info("Task restored"),
        None => println!("Nothing to undo."),
    }
    Ok(())
}

pub fn handle_theme_command(ctx: &AppContext, args: ThemeArgs) -> Result<()> {
    let current = ThemeName::resolve(ctx.storage.saved_theme(), ctx.config.theme_fallback);
    let next = match args.command.unwrap_or(ThemeCommand::Show) {
        ThemeCommand::Show => {
            println!("Theme: {current}");
            return Ok(());
        }
        ThemeCommand::Set { theme } => theme,
        ThemeCommand::Toggle => current.toggled(),
    };
    if !ctx.storage.save_theme(next) {
        bail!("could not save theme");
    }
    println!("Theme: {next}");
    Ok(())
}

pub fn handle_offline_command(ctx: &AppContext, args: OfflineArgs) -> Result<()> {
    match args.command {
        OfflineCommand::Install(site) => offline_install(ctx, &site),
        OfflineCommand::Fetch(args) => offline_fetch(ctx, args),
        OfflineCommand::Status => {
            let cache = SqliteCacheStorage::new(ctx.storage.clone());
            let keys = ctx.runtime.block_on(cache.keys())?;
            println!(
                "{}",
                format_buckets(&keys, &ctx.config.offline.cache_version)
            );
            Ok(())
        }
        OfflineCommand::Push(args) => {
            let controller = cache_controller(ctx, None, network(ctx, &SiteArgs::default())?)?;
            let shown = ctx
                .runtime
                .block_on(controller.on_push(args.message.as_deref()));
            if !shown {
                println!("Notification was not shown: permission denied.");
            }
            Ok(())
        }
    }
}

fn network(ctx: &AppContext, site: &SiteArgs) -> Result<Arc<dyn Network>> {
    let origin = &ctx.config.offline.origin;
    Ok(match &site.site {
        Some(root) => Arc::new(DirectoryNetwork::new(root, origin)?),
        None => Arc::new(HttpNetwork::new(origin)?),
    })
}

fn cache_controller(
    ctx: &AppContext,
    version: Option<&str>,
    network: Arc<dyn Network>,
) -> Result<CacheController> {
    Ok(CacheController::new(
        version.unwrap_or(&ctx.config.offline.cache_version),
        ctx.config.offline.manifest.clone(),
        parse_origin(&ctx.config.offline.origin)?,
        Arc::new(SqliteCacheStorage::new(ctx.storage.clone())),
        network,
        Arc::new(ConsoleHost::new(ctx.center.clone())),
    ))
}

/// Re-adopts whatever bucket an earlier run left behind, preferring the
/// configured version.
async fn restore_registration(
    ctx: &AppContext,
    network: Arc<dyn Network>,
) -> Result<Registration> {
    let cache = SqliteCacheStorage::new(ctx.storage.clone());
    let keys = cache.keys().await?;
    let configured = &ctx.config.offline.cache_version;
    let previous = keys
        .iter()
        .find(|name| *name == configured)
        .or_else(|| keys.first());

    let mut registration = Registration::new(network.clone());
    if let Some(version) = previous {
        registration
            .restore(cache_controller(ctx, Some(version.as_str()), network)?)
            .await?;
    }
    Ok(registration)
}

fn offline_install(ctx: &AppContext, site: &SiteArgs) -> Result<()> {
    let network = network(ctx, site)?;
    ctx.runtime.block_on(async {
        let mut registration = restore_registration(ctx, network.clone()).await?;
        let previous = registration.active_version().map(str::to_string);
        let controller = cache_controller(ctx, None, network)?;
        let assets = controller.manifest().len();

        let report = registration.register(controller).await.with_context(|| {
            match &previous {
                Some(version) => format!("offline install failed, {version} stays active"),
                None => "offline install failed".to_string(),
            }
        })?;
        println!(
            "Installed {} ({assets} assets)",
            ctx.config.offline.cache_version
        );
        if !report.purged.is_empty() {
            println!("Purged old caches: {}", report.purged.join(", "));
        }
        Ok(())
    })
}

fn offline_fetch(ctx: &AppContext, args: OfflineFetchArgs) -> Result<()> {
    let network = network(ctx, &args.site)?;
    let response = ctx.runtime.block_on(async {
        let registration = restore_registration(ctx, network).await?;
        let response = registration.fetch(&Request::get(&args.url)).await?;
        registration.settle().await;
        anyhow::Ok(response)
    })?;

    if args.body {
        use std::io::Write as _;
        io::stdout()
            .write_all(&response.body)
            .context("writing response body")?;
    } else {
        println!("{}", format_response(&response));
    }
    Ok(())
}

fn format_todos(
    todos: &[TodoRecord],
    filter: TodoFilter,
    now: OffsetDateTime,
    offset: UtcOffset,
) -> String {
    if todos.is_empty() {
        return filter.empty_message().to_string();
    }
    let mut out = String::new();
    for todo in todos {
        let mark = if todo.completed { "[x]" } else { "[ ]" };
        let mut line = format!("{mark} {}  ({})", todo.title, todo.priority.label());
        if let Some(date) = text::parse_date(&todo.date) {
            let _ = write!(&mut line, "  due {}", text::format_date(date));
            if let Some(time) = text::parse_time(&todo.time) {
                let _ = write!(&mut line, " at {}", text::format_time(time));
            }
        }
        if todos::is_overdue(todo, now, offset) {
            line.push_str("  OVERDUE");
        }
        let _ = writeln!(&mut out, "{line}");
        let _ = writeln!(&mut out, "    id {}", todo.id);
    }
    out.trim_end().to_string()
}

fn format_note_cards(
    cards: &[NoteCard],
    filter: NoteFilter,
    total: usize,
    progress: u8,
) -> String {
    let mut out = String::new();
    let _ = writeln!(&mut out, "{total} note(s), progress {progress}%");
    if cards.is_empty() {
        out.push_str(filter.empty_message());
        return out;
    }
    for card in cards {
        let mut headline = format!("{}  ({})", card.title, card.date_label);
        if card.achieved {
            headline.push_str("  [ACHIEVED]");
        }
        if card.attachment_count > 0 {
            let _ = write!(&mut headline, "  +{} attachment(s)", card.attachment_count);
        }
        let _ = writeln!(&mut out, "\n{headline}");
        let _ = writeln!(&mut out, "    id {}", card.id);
        if !card.preview.is_empty() {
            let _ = writeln!(&mut out, "    {}", card.preview);
        }
    }
    out.trim_end().to_string()
}

fn format_note(note: &NoteRecord) -> String {
    let card = NoteCard::from(note);
    let mut out = String::new();
    let _ = writeln!(&mut out, "{}", note.title);
    let _ = write!(
        &mut out,
        "{}  {} words",
        card.date_label,
        text::count_words(&note.text)
    );
    if note.achieved {
        out.push_str("  [ACHIEVED]");
    }
    out.push('\n');
    for attachment in &note.attachments {
        let _ = writeln!(
            &mut out,
            "  - {} ({}, id {})",
            attachment.name, attachment.mime_type, attachment.id
        );
    }
    if !note.text.is_empty() {
        let _ = write!(&mut out, "\n{}", note.text);
    }
    out.trim_end().to_string()
}

fn format_buckets(keys: &[String], configured: &str) -> String {
    if keys.is_empty() {
        return "No offline cache installed.".to_string();
    }
    let mut out = String::from("Cache buckets:");
    for key in keys {
        if key == configured {
            let _ = write!(&mut out, "\n* {key} (current)");
        } else {
            let _ = write!(&mut out, "\n  {key}");
        }
    }
    out
}

fn format_response(response: &Response) -> String {
    let content_type = response.header("content-type").unwrap_or("unknown type");
    format!(
        "{} {} {}  {} bytes",
        response.status,
        response.kind,
        content_type,
        response.body.len()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::test_support::{center, RecordingNotifier};
    use crate::notify::NotificationPermission;
    use crate::storage::test_support::init_storage;
    use crate::storage::Attachment;
    use tempfile::TempDir;
    use time::macros::{datetime, offset};

    type TestResult<T = ()> = Result<T>;

    fn setup(
        tweak: impl FnOnce(&mut AppConfig),
    ) -> TestResult<(TempDir, AppContext, Arc<RecordingNotifier>)> {
        let (temp, storage) = init_storage()?;
        let mut config = AppConfig::default();
        tweak(&mut config);
        let (center, notifier, _calls) = center(NotificationPermission::Granted);
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let ctx = AppContext {
            config: Arc::new(config),
            paths: ConfigPaths::rooted_at(temp.path()),
            storage,
            center,
            runtime,
        };
        Ok((temp, ctx, notifier))
    }

    fn todo(id: &str, title: &str, date: &str, time: &str, completed: bool) -> TodoRecord {
        TodoRecord {
            id: id.into(),
            title: title.into(),
            priority: Priority::High,
            date: date.into(),
            time: time.into(),
            completed,
            created_at: "2025-03-01T08:00:00Z".into(),
            updated_at: None,
        }
    }

    #[test]
    fn todo_listing_marks_due_and_overdue() {
        let todos = vec![
            todo("t1", "Water plants", "2025-03-01", "10:00", false),
            todo("t2", "Pay rent", "2025-02-27", "", false),
            todo("t3", "Call mum", "", "", true),
        ];
        let output = format_todos(
            &todos,
            TodoFilter::All,
            datetime!(2025-03-01 09:00 UTC),
            offset!(UTC),
        );
        insta::assert_snapshot!(output, @r###"
        [ ] Water plants  (High)  due Mar 1, 2025 at 10:00
            id t1
        [ ] Pay rent  (High)  due Feb 27, 2025  OVERDUE
            id t2
        [x] Call mum  (High)
            id t3
        "###);
    }

    #[test]
    fn empty_todo_listing_uses_filter_message() {
        let output = format_todos(
            &[],
            TodoFilter::Active,
            datetime!(2025-03-01 09:00 UTC),
            offset!(UTC),
        );
        assert_eq!(output, "No active tasks. All done!");
    }

    #[test]
    fn note_cards_show_progress_and_flags() {
        let cards = vec![
            NoteCard {
                id: "n1".into(),
                title: "Trip".into(),
                date_label: "Feb 1, 2025".into(),
                preview: "Pack the tent".into(),
                achieved: true,
                attachment_count: 2,
            },
            NoteCard {
                id: "n2".into(),
                title: "Untitled Note".into(),
                date_label: "Jan 9, 2025".into(),
                preview: String::new(),
                achieved: false,
                attachment_count: 0,
            },
        ];
        let output = format_note_cards(&cards, NoteFilter::All, 2, 2);
        insta::assert_snapshot!(output, @r###"
        2 note(s), progress 2%

        Trip  (Feb 1, 2025)  [ACHIEVED]  +2 attachment(s)
            id n1
            Pack the tent

        Untitled Note  (Jan 9, 2025)
            id n2
        "###);
    }

    #[test]
    fn note_detail_lists_attachments() {
        let note = NoteRecord {
            id: "n1".into(),
            title: "Trip".into(),
            content: "<p>Pack the tent</p>".into(),
            text: "Pack the tent".into(),
            attachments: vec![Attachment {
                id: "a1".into(),
                name: "map.png".into(),
                mime_type: "image/png".into(),
                data: "data:image/png;base64,".into(),
            }],
            created_at: "2025-02-01T08:00:00Z".into(),
            updated_at: String::new(),
            achieved: false,
        };
        insta::assert_snapshot!(format_note(&note), @r###"
        Trip
        Feb 1, 2025  3 words
          - map.png (image/png, id a1)

        Pack the tent
        "###);
    }

    #[test]
    fn bucket_listing_marks_current_version() {
        let keys = vec!["spailacpad-v0".to_string(), "spailacpad-v1".to_string()];
        insta::assert_snapshot!(format_buckets(&keys, "spailacpad-v1"), @r###"
        Cache buckets:
          spailacpad-v0
        * spailacpad-v1 (current)
        "###);
        assert_eq!(format_buckets(&[], "v1"), "No offline cache installed.");
    }

    #[test]
    fn cli_todo_delete_then_undo_restores() -> TestResult {
        let (_temp, ctx, notifier) = setup(|_| {})?;
        ctx.storage.save_todos(&[todo("t1", "Keep", "", "", false)]);

        handle_todo_command(
            &ctx,
            TodoArgs {
                command: TodoCommand::Delete(IdArgs { id: "t1".into() }),
            },
        )?;
        assert!(ctx.storage.load_todos().is_empty());
        undo_last(&ctx)?;

        assert_eq!(ctx.storage.load_todos().len(), 1);
        assert_eq!(
            notifier.toast_messages(),
            vec!["Task deleted".to_string(), "Task restored".to_string()]
        );
        assert!(notifier.toasts.lock()[0].undo);
        Ok(())
    }

    #[test]
    fn cli_todo_unknown_id_is_an_error() -> TestResult {
        let (_temp, ctx, _notifier) = setup(|_| {})?;
        let result = handle_todo_command(
            &ctx,
            TodoArgs {
                command: TodoCommand::Toggle(IdArgs { id: "ghost".into() }),
            },
        );
        assert!(result.is_err());
        Ok(())
    }

    #[test]
    fn cli_todo_add_rejects_bad_dates() -> TestResult {
        let (_temp, ctx, _notifier) = setup(|_| {})?;
        let result = todo_add(
            &ctx,
            TodoAddArgs {
                title: "Dentist".into(),
                priority: Priority::Low,
                date: Some("tomorrow".into()),
                time: None,
            },
        );
        assert!(result.is_err());
        assert!(ctx.storage.load_todos().is_empty());
        Ok(())
    }

    #[test]
    fn cli_note_new_then_export_writes_text_file() -> TestResult {
        let (temp, ctx, notifier) = setup(|_| {})?;
        note_new(
            &ctx,
            NoteWriteArgs {
                title: Some("Packing List!".into()),
                body: Some("<p>tent and stove</p>".into()),
                format: vec![FormatArg::Bold],
                ..NoteWriteArgs::default()
            },
        )?;
        let notes = ctx.storage.load_notes();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].content, "<b><p>tent and stove</p></b>");

        let out = temp.path().join("out");
        note_export(
            &ctx,
            NoteExportArgs {
                id: notes[0].id.clone(),
                out: Some(out.clone()),
            },
        )?;
        let written = fs::read_to_string(out.join("packing_list_.txt"))?;
        assert_eq!(written, "Packing List!\n\ntent and stove");
        assert_eq!(notifier.toast_messages(), vec!["Note saved successfully".to_string()]);
        Ok(())
    }

    #[test]
    fn cli_note_edit_can_undo_its_own_changes() -> TestResult {
        let (_temp, ctx, _notifier) = setup(|_| {})?;
        note_new(
            &ctx,
            NoteWriteArgs {
                title: Some("Draft".into()),
                body: Some("first".into()),
                ..NoteWriteArgs::default()
            },
        )?;
        let id = ctx.storage.load_notes()[0].id.clone();

        note_edit(
            &ctx,
            NoteEditArgs {
                id: id.clone(),
                write: NoteWriteArgs {
                    body: Some("second".into()),
                    ..NoteWriteArgs::default()
                },
                remove_attachment: Vec::new(),
                undo: 1,
                redo: 0,
            },
        )?;
        assert_eq!(ctx.storage.load_notes()[0].content, "first");
        Ok(())
    }

    #[test]
    fn cli_note_close_without_save_follows_autosave_setting() -> TestResult {
        let draft = || NoteWriteArgs {
            title: Some("Draft".into()),
            body: Some("half a thought".into()),
            no_save: true,
            ..NoteWriteArgs::default()
        };

        let (_temp, ctx, notifier) = setup(|_| {})?;
        note_new(&ctx, draft())?;
        assert_eq!(ctx.storage.load_notes()[0].content, "half a thought");
        assert!(notifier.toast_messages().is_empty());

        let (_temp, ctx, _notifier) = setup(|cfg| cfg.editor.autosave_on_close = false)?;
        note_new(&ctx, draft())?;
        assert!(ctx.storage.load_notes().is_empty());
        Ok(())
    }

    #[test]
    fn cli_todo_add_confirms_future_reminder() -> TestResult {
        let (_temp, ctx, notifier) = setup(|_| {})?;
        todo_add(
            &ctx,
            TodoAddArgs {
                title: "Renew passport".into(),
                priority: Priority::High,
                date: Some("2099-01-01".into()),
                time: Some("10:00".into()),
            },
        )?;
        assert_eq!(
            notifier.toast_messages(),
            vec![
                "Task added successfully".to_string(),
                "Reminder set for Jan 1, 2099 at 10:00".to_string(),
            ]
        );
        Ok(())
    }

    #[test]
    fn cli_note_import_uses_first_line_as_title() -> TestResult {
        let (temp, ctx, notifier) = setup(|_| {})?;
        let file = temp.path().join("groceries.txt");
        fs::write(&file, "Groceries\n\n  eggs\nmilk  \n")?;
        note_import(&ctx, NoteImportArgs { file })?;

        let notes = ctx.storage.load_notes();
        assert_eq!(notes[0].title, "Groceries");
        assert_eq!(notes[0].content, "eggs\nmilk");
        assert_eq!(
            notifier.toast_messages(),
            vec!["Note imported successfully".to_string()]
        );
        Ok(())
    }

    #[test]
    fn cli_theme_toggle_persists() -> TestResult {
        let (_temp, ctx, _notifier) = setup(|cfg| cfg.theme_fallback = ThemeName::Dark)?;
        handle_theme_command(
            &ctx,
            ThemeArgs {
                command: Some(ThemeCommand::Toggle),
            },
        )?;
        assert_eq!(ctx.storage.saved_theme(), Some(ThemeName::Light));
        Ok(())
    }

    #[test]
    fn cli_offline_install_from_site_directory() -> TestResult {
        let (temp, ctx, _notifier) = setup(|cfg| {
            cfg.offline.cache_version = "test-v2".into();
            cfg.offline.manifest = vec!["/".into(), "/css/styles.css".into()];
        })?;
        let site = temp.path().join("site");
        fs::create_dir_all(site.join("css"))?;
        fs::write(site.join("index.html"), "<h1>hi</h1>")?;
        fs::write(site.join("css/styles.css"), "body{}")?;

        let cache = SqliteCacheStorage::new(ctx.storage.clone());
        ctx.runtime.block_on(cache.open("test-v1"))?;

        offline_install(&ctx, &SiteArgs { site: Some(site.clone()) })?;
        let keys = ctx.runtime.block_on(cache.keys())?;
        assert_eq!(keys, vec!["test-v2"]);

        fs::remove_file(site.join("index.html"))?;
        let network = network(&ctx, &SiteArgs { site: Some(site) })?;
        let hit = ctx.runtime.block_on(async {
            let registration = restore_registration(&ctx, network).await?;
            anyhow::Ok(registration.fetch(&Request::get("/")).await?)
        })?;
        assert_eq!(hit.body, b"<h1>hi</h1>");
        Ok(())
    }

    #[test]
    fn cli_offline_failed_install_keeps_previous_bucket() -> TestResult {
        let (temp, ctx, _notifier) = setup(|cfg| {
            cfg.offline.cache_version = "test-v2".into();
            cfg.offline.manifest = vec!["/missing.js".into()];
        })?;
        let cache = SqliteCacheStorage::new(ctx.storage.clone());
        ctx.runtime.block_on(cache.open("test-v1"))?;

        let result = offline_install(
            &ctx,
            &SiteArgs {
                site: Some(temp.path().to_path_buf()),
            },
        );
        let err = result.expect_err("install should fail");
        assert!(format!("{err:#}").contains("test-v1 stays active"));
        assert_eq!(ctx.runtime.block_on(cache.keys())?, vec!["test-v1"]);
        Ok(())
    }
}

use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use freight_desk::config::AppConfig;
use freight_desk::error::AppError;
use freight_desk::infra::{MemoryBackend, SupabaseClient};
use freight_desk::telemetry;
use freight_desk::workflows::roles::account::{self, AccountError};
use freight_desk::workflows::roles::domain::{ModerationStatus, ProfileId, Role, TruckType, UserId};
use freight_desk::workflows::roles::moderation::{
    display_or_dash, Filter, ModerationError, ModerationTable, ProfileView, SortDirection, SortKey,
};
use freight_desk::workflows::roles::onboarding::{OnboardingError, OnboardingFlow};
use freight_desk::workflows::roles::repository::{
    BlobStorage, DocumentRepository, RoleRepository, UserMetadata,
};
use freight_desk::workflows::roles::{
    DocumentPanel, DocumentUploadManager, ModerationAction, Notice, SessionProvider, UploadFile,
};
use serde_json::json;
use tracing::info;

const SESSION_TIMEOUT: Duration = Duration::from_secs(10);
const DEMO_MODERATOR_EMAIL: &str = "moderator@freight.example";
const DEMO_MODERATOR_PASSWORD: &str = "moderator-pass";

#[derive(Parser, Debug)]
#[command(
    name = "freight-desk",
    about = "Role onboarding and moderation for the freight marketplace",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run onboarding, uploads, and moderation end to end on an in-memory backend (default)
    Demo(DemoArgs),
    /// Inspect and moderate role profiles on the configured backend
    Profiles {
        #[command(subcommand)]
        command: ProfilesCommand,
    },
}

#[derive(Args, Debug, Default)]
struct DemoArgs {
    /// Reject the demo application instead of approving it
    #[arg(long)]
    reject: bool,
}

#[derive(Subcommand, Debug)]
enum ProfilesCommand {
    /// List role profiles
    List(ListArgs),
    /// Approve a pending profile
    Approve(ModerateArgs),
    /// Reject a pending profile
    Reject(ModerateArgs),
    /// Delete an approved or rejected profile
    Delete(ModerateArgs),
}

#[derive(Args, Debug)]
struct AdminArgs {
    /// Moderator e-mail
    #[arg(long, env = "FREIGHT_ADMIN_EMAIL")]
    email: String,
    /// Moderator password
    #[arg(long, env = "FREIGHT_ADMIN_PASSWORD", hide_env_values = true)]
    password: String,
}

#[derive(Args, Debug)]
struct ListArgs {
    #[command(flatten)]
    admin: AdminArgs,
    /// Only show profiles for this role
    #[arg(long)]
    role: Option<Role>,
    /// Only show profiles with this status
    #[arg(long)]
    status: Option<ModerationStatus>,
    /// Sort column
    #[arg(long, value_enum, default_value_t = SortColumn::Created)]
    sort: SortColumn,
    /// Sort descending
    #[arg(long)]
    descending: bool,
}

#[derive(Args, Debug)]
struct ModerateArgs {
    #[command(flatten)]
    admin: AdminArgs,
    /// Profile id
    id: String,
    /// Confirm the action; without it nothing is sent
    #[arg(long)]
    yes: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SortColumn {
    Name,
    Created,
}

impl From<SortColumn> for SortKey {
    fn from(value: SortColumn) -> Self {
        match value {
            SortColumn::Name => SortKey::FullName,
            SortColumn::Created => SortKey::CreatedAt,
        }
    }
}

#[tokio::main]
async fn main() {
    if let Err(err) = run_cli().await {
        eprintln!("application error: {err}");
        std::process::exit(1);
    }
}

async fn run_cli() -> Result<(), AppError> {
    let cli = Cli::parse();
    let config = AppConfig::load()?;
    telemetry::init(&config.telemetry)?;

    let command = cli
        .command
        .unwrap_or_else(|| Command::Demo(DemoArgs::default()));

    match command {
        Command::Demo(args) => run_demo(&config, args).await,
        Command::Profiles { command } => match command {
            ProfilesCommand::List(args) => run_list(&config, args).await,
            ProfilesCommand::Approve(args) => {
                run_moderation(&config, args, ModerationAction::Approve).await
            }
            ProfilesCommand::Reject(args) => {
                run_moderation(&config, args, ModerationAction::Reject).await
            }
            ProfilesCommand::Delete(args) => {
                run_moderation(&config, args, ModerationAction::Delete).await
            }
        },
    }
}

async fn run_demo(config: &AppConfig, args: DemoArgs) -> Result<(), AppError> {
    let backend = Arc::new(MemoryBackend::new());
    let session = SessionProvider::start(Arc::clone(&backend)).await;

    let mut metadata = UserMetadata::new();
    metadata.insert("full_name".to_string(), json!("Demo Moderator"));
    let moderator = backend
        .register(DEMO_MODERATOR_EMAIL, DEMO_MODERATOR_PASSWORD, metadata)
        .map_err(AccountError::from)?;
    backend.grant_admin(&moderator.id);

    println!("Onboarding a carrier");
    let mut flow = OnboardingFlow::registration();
    if let Some(form) = flow.form_mut() {
        form.contact.full_name = "Dana Hauler".to_string();
        form.contact.email = "dana@haulers.example".to_string();
        form.contact.phone = "+12025550100".to_string();
        form.contact.password = "road-ready-1".to_string();
        form.contact.confirm_password = "road-ready-1".to_string();
    }
    advance(&mut flow)?;
    flow.toggle_role(Role::Carrier);
    advance(&mut flow)?;
    if let Some(form) = flow.form_mut() {
        form.details.has_company = true;
        form.details.company_name = "Hauler Logistics LLC".to_string();
        form.details.carrier.truck_type = Some(TruckType::Reefer);
        form.details.carrier.mc_number = "MC-482910".to_string();
        form.details.carrier.usdot_number = "3120457".to_string();
        form.details.carrier.operating_states = "TX, OK, LA".to_string();
        form.details.confirm_accuracy = true;
    }
    let receipt = flow
        .submit(&session, backend.as_ref(), backend.as_ref())
        .await?
        .clone();
    println!("- {}", receipt.message);

    println!("\nUploading evidence");
    let manager = DocumentUploadManager::new(
        Arc::clone(&backend),
        Arc::clone(&backend),
        config.documents.clone(),
    );
    let mut panel = DocumentPanel::open(manager, receipt.user.clone(), Role::Carrier).await?;
    panel
        .upload(UploadFile::new("cdl-license.pdf", b"%PDF-1.7 demo".to_vec()))
        .await?;
    panel
        .upload(UploadFile::new(
            "truck-photo.png",
            b"\x89PNG\r\n\x1a\ndemo".to_vec(),
        ))
        .await?;
    print_notices(panel.take_notices());
    println!("- {} document(s) attached", panel.documents().len());

    println!("\nModerating");
    account::sign_in(backend.as_ref(), DEMO_MODERATOR_EMAIL, DEMO_MODERATOR_PASSWORD).await?;
    await_user(&session, &moderator.id).await?;

    let mut table = ModerationTable::open(
        &session,
        Arc::clone(&backend),
        Arc::clone(&backend),
        Arc::clone(&backend),
    )
    .await?;
    table.load().await;
    render_rows(&table.visible_rows());

    let Some(profile_id) = receipt.profiles.first().map(|profile| profile.id.clone()) else {
        return Ok(());
    };
    table.toggle_row(&profile_id);
    if let Some(row) = table.expanded_row() {
        render_details(row);
    }

    let action = if args.reject {
        ModerationAction::Reject
    } else {
        ModerationAction::Approve
    };
    let prompt = table.request_action(&profile_id, action)?.prompt();
    println!("\n{prompt} yes");
    table.confirm().await?;
    print_notices(table.take_notices());
    render_rows(&table.visible_rows());

    session.shutdown();
    Ok(())
}

fn advance(flow: &mut OnboardingFlow) -> Result<(), OnboardingError> {
    if flow.next_step() {
        return Ok(());
    }
    Err(flow
        .validate_current_step()
        .err()
        .map(OnboardingError::from)
        .unwrap_or(OnboardingError::NotReady))
}

async fn await_user(session: &SessionProvider, user_id: &UserId) -> Result<(), AppError> {
    match tokio::time::timeout(SESSION_TIMEOUT, session.wait_for_user(user_id)).await {
        Ok(Some(_)) => Ok(()),
        _ => Err(ModerationError::Unauthenticated.into()),
    }
}

async fn connect(
    config: &AppConfig,
    admin: &AdminArgs,
) -> Result<(Arc<SupabaseClient>, Arc<SessionProvider>), AppError> {
    let client = Arc::new(SupabaseClient::new(&config.backend)?);
    let session = SessionProvider::start(Arc::clone(&client)).await;
    let signed_in = account::sign_in(client.as_ref(), &admin.email, &admin.password).await?;
    await_user(&session, &signed_in.user.id).await?;
    info!(backend = %config.backend.url, "moderator signed in");
    Ok((client, session))
}

async fn open_table<C>(
    session: &SessionProvider,
    client: &Arc<C>,
) -> Result<ModerationTable<C, C, C>, AppError>
where
    C: RoleRepository + DocumentRepository + BlobStorage,
{
    let mut table = ModerationTable::open(
        session,
        Arc::clone(client),
        Arc::clone(client),
        Arc::clone(client),
    )
    .await?;
    table.load().await;
    print_notices(table.take_notices());
    Ok(table)
}

async fn run_list(config: &AppConfig, args: ListArgs) -> Result<(), AppError> {
    let (client, session) = connect(config, &args.admin).await?;
    let mut table = open_table(&session, &client).await?;

    table.set_role_filter(args.role.map_or(Filter::All, Filter::Only));
    table.set_status_filter(args.status.map_or(Filter::All, Filter::Only));
    let key = SortKey::from(args.sort);
    let direction = if args.descending {
        SortDirection::Descending
    } else {
        SortDirection::Ascending
    };
    // A new column starts ascending and a repeated one flips, so at most two clicks.
    for _ in 0..2 {
        let order = table.sort_order();
        if order.key == key && order.direction == direction {
            break;
        }
        table.sort_by(key);
    }

    render_rows(&table.visible_rows());
    session.shutdown();
    Ok(())
}

async fn run_moderation(
    config: &AppConfig,
    args: ModerateArgs,
    action: ModerationAction,
) -> Result<(), AppError> {
    let (client, session) = connect(config, &args.admin).await?;
    let mut table = open_table(&session, &client).await?;
    let profile_id = ProfileId(args.id);

    let prompt = table.request_action(&profile_id, action)?.prompt();
    if !args.yes {
        table.cancel_confirmation();
        println!("{prompt} (pass --yes to confirm; nothing was sent)");
        session.shutdown();
        return Ok(());
    }

    let outcome = table.confirm().await;
    print_notices(table.take_notices());
    session.shutdown();
    outcome?;
    Ok(())
}

fn render_rows(rows: &[&ProfileView]) {
    if rows.is_empty() {
        println!("\nProfiles: none");
        return;
    }
    println!("\nProfiles");
    for row in rows {
        let actions: Vec<&str> = row
            .available_actions()
            .iter()
            .map(|action| action.label())
            .collect();
        println!(
            "- {} | {} | {} | {} | {} | {} | actions: {}",
            row.id,
            row.role,
            display_or_dash(Some(row.full_name.as_str())),
            display_or_dash(row.email.as_deref()),
            row.status,
            row.created_at.format("%Y-%m-%d %H:%M"),
            actions.join(", ")
        );
    }
}

fn render_details(row: &ProfileView) {
    println!("\nDetails for {}", row.id);
    for (label, value) in row.detail_fields() {
        println!("- {label}: {value}");
    }
    for document in &row.documents {
        let kind = if document.is_image { "image" } else { "file" };
        println!("- [{kind}] {} -> {}", document.name, document.url);
    }
}

fn print_notices(notices: Vec<Notice>) {
    for notice in notices {
        println!("[{:?}] {}", notice.level, notice.message);
    }
}

use std::{path::PathBuf, sync::Arc, time::Duration};

use wb_core::{
	BindingConfig, Context, MutationNotifier, Notification, NotificationChannel, RecordDraft,
	RecordId, TransportError,
};

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info};

mod logging;
mod page;
mod seed;

use page::AccountPage;

#[derive(Parser, Debug)]
#[command(name = "wb-relist", about = "Account page with related lists kept fresh")]
struct Cli {
	/// Where the config and logs live
	#[arg(long)]
	data_dir: Option<PathBuf>,

	/// Account record the page shows
	#[arg(long, default_value = "001A")]
	account: String,

	/// Simulated store round trip, in milliseconds
	#[arg(long, default_value_t = 50)]
	latency_ms: u64,

	/// Query that fails once the page is mounted, by label (repeatable)
	#[arg(long = "fail-query")]
	fail_queries: Vec<String>,

	#[command(subcommand)]
	command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
	/// Render the account page
	Show,
	/// Create a contact under the account, then show the refreshed page
	CreateContact {
		#[arg(long)]
		first_name: Option<String>,
		#[arg(long)]
		last_name: Option<String>,
		/// Have the store reject the write
		#[arg(long)]
		reject: bool,
	},
	/// Refresh everything on the page
	Refresh,
}

/// Prints notifications the way a toast would show them.
struct ConsoleNotifications;

impl NotificationChannel for ConsoleNotifications {
	fn notify(&self, Notification { kind, title, message }: Notification) {
		println!("[{kind:?}] {title}: {message}");
	}
}

#[tokio::main]
async fn main() -> Result<()> {
	let cli = Cli::parse();

	let data_dir = match cli.data_dir {
		Some(data_dir) => data_dir,
		None => std::env::current_dir()
			.context("Unable to get your current directory, try passing --data-dir")?
			.join("relist_data"),
	};

	let logging = logging::init(&data_dir)?;

	info!(data_dir = %data_dir.display(), "Starting relist");

	let config = BindingConfig::load_or_create(&data_dir)
		.await
		.context("Failed to load config")?;
	logging.apply_log_level(&config.log_level)?;

	let account = RecordId::from(cli.account);
	let store = Arc::new(
		seed::store(&account).with_latency(Duration::from_millis(cli.latency_ms)),
	);

	let mut record_updates = store.record_updates();
	tokio::spawn(async move {
		while let Ok(ids) = record_updates.recv().await {
			let ids = ids.iter().map(ToString::to_string).collect::<Vec<_>>();
			println!("Record updates available: {}", ids.join(", "));
		}
	});

	let ctx = Context::with_store(Arc::clone(&store), config)
		.with_notifications(Arc::new(ConsoleNotifications));

	let page = AccountPage::mount(&ctx, &account).await;

	for query in cli.fail_queries {
		store.fail_query(query);
	}

	let notifier = MutationNotifier::new(ctx.clone());

	match cli.command {
		Commands::Show => {}
		Commands::CreateContact {
			first_name,
			last_name,
			reject,
		} => {
			if reject {
				store.fail_writes(Some(TransportError::rejected(
					400,
					"Insufficient access rights on cross-reference id",
				)));
			}

			let mut draft = RecordDraft::new("Contact").parent("AccountId", page.account());
			if let Some(first_name) = first_name {
				draft = draft.field("FirstName", first_name);
			}
			if let Some(last_name) = last_name {
				draft = draft.field("LastName", last_name);
			}

			match notifier
				.create_record(&page.host, draft, [&page.related, &page.summary])
				.await
			{
				Ok(created) => {
					let outcome = created.refresh.await;
					info!(record_id = %created.record.id, %outcome, "Contact created");
				}
				Err(e) => error!("Contact not created: {e}"),
			}
		}
		Commands::Refresh => {
			let outcome = notifier
				.refresh(&page.host, [page.account()], [&page.related, &page.summary])
				.await;
			info!(%outcome, "Page refreshed");
		}
	}

	println!("\n{}", page.render());

	Ok(())
}

use clap::Parser;
use fake::{
    faker::{lorem::en::{Paragraph, Sentence}, name::en::Name},
    Fake,
};
use rand::{seq::SliceRandom, Rng};

use herald::{
    config::Settings,
    db,
    domain::AnnouncementRequest,
    service::ServiceContext,
};

const TAG_POOL: &[&str] = &["release", "security", "maintenance", "community", "patches", "manager"];

#[derive(Parser, Debug)]
#[command(about = "Fill the announcement store with sample data")]
struct Args {
    /// Number of announcements to create
    #[arg(long, default_value_t = 25)]
    count: usize,

    /// Database URL (defaults to the configured one)
    #[arg(long)]
    database_url: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut settings = Settings::new().unwrap_or_default();
    if let Some(url) = args.database_url {
        settings.database.url = url;
    }

    println!("🌱 Seeding {} announcements into {}", args.count, settings.database.url);

    let db_pool = db::connect(&settings.database).await?;
    let context = ServiceContext::new(db_pool, &settings).await?;
    let service = &context.announcement_service;

    let mut rng = rand::thread_rng();
    for _ in 0..args.count {
        let tag_count = rng.gen_range(0..=3);
        let tags: Vec<&str> = TAG_POOL.choose_multiple(&mut rng, tag_count).copied().collect();
        let attachments: Vec<String> = (0..rng.gen_range(0..=2))
            .map(|n| format!("https://example.com/assets/{}.png", n))
            .collect();

        let mut title: String = Sentence(2..5).fake();
        title.truncate(64);

        let request = AnnouncementRequest {
            author: rng.gen_bool(0.7).then(|| Name().fake::<String>().chars().take(32).collect()),
            content: Some(Paragraph(1..3).fake()),
            level: rng.gen_range(0..3),
            ..AnnouncementRequest::new(title)
        }
        .with_tags(tags)
        .with_attachments(attachments);

        let announcement = service.create(request).await?;
        println!("  ✅ #{} {}", announcement.id, announcement.title);
    }

    let tags = service.tags().await?;
    println!("🏷️  {} tags in use", tags.len());

    let token = context.auth_service.issue_token()?;
    println!("🔑 Bearer token: {}", token);

    Ok(())
}

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use serde_json::json;

use stagemood_lib::{
    capture::ReplayScript, init_logging, models::StudentContext, replay, AppContext,
};

#[derive(Parser)]
#[command(name = "stagemood", about = "Emotion-aware stage progress for the infographic game")]
struct Cli {
    /// Directory holding settings.json, the SQLite file and the journal.
    #[arg(long, default_value = ".stagemood")]
    data_dir: PathBuf,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Play a scripted stage attempt and store the result.
    Replay {
        script: PathBuf,
        #[arg(long)]
        user: String,
        #[arg(long, default_value = "student")]
        username: String,
        #[arg(long, default_value = "")]
        email: String,
    },
    /// List stored progress rows for a user, newest first.
    Progress {
        #[arg(long)]
        user: String,
    },
    /// List emotion verdicts and their distribution for a user.
    Emotions {
        #[arg(long)]
        user: String,
        #[arg(long)]
        level: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let ctx = AppContext::build(&cli.data_dir)?;

    match cli.cmd {
        Commands::Replay {
            script,
            user,
            username,
            email,
        } => {
            let script = ReplayScript::load(&script)?;
            let student = StudentContext::new(user, username, email);

            let mut notices = ctx.notices.subscribe();
            tokio::spawn(async move {
                while let Ok(notice) = notices.recv().await {
                    if let Ok(line) = serde_json::to_string(&notice) {
                        eprintln!("{line}");
                    }
                }
            });

            let summary = replay(&ctx, student, &script).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Progress { user } => {
            let rows = ctx.database()?.list_progress_for_user(&user).await?;
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
        Commands::Emotions { user, level } => {
            let db = ctx.database()?;
            let logs = db.list_emotion_logs(&user, level).await?;
            let distribution = db.emotion_distribution(&user).await?;
            let output = json!({ "logs": logs, "distribution": distribution });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

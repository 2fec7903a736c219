use std::io::{self, Write};
use std::time::Duration;

use clap::Parser;
use colored::Colorize;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

const POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Parser)]
#[command(name = "parley-shell", about = "Join a parley conversation from the terminal")]
struct Args {
    #[arg(long, default_value = "http://localhost:7070")]
    api_base: String,
    /// Participant id; created with `--secret` when it does not exist yet.
    #[arg(long)]
    user: String,
    #[arg(long)]
    secret: Option<String>,
    #[arg(long)]
    topic: String,
    #[arg(long)]
    assignment_id: Option<String>,
    /// Rating names asked for once the conversation is over.
    #[arg(long, value_delimiter = ',', default_value = "engaging")]
    ratings: Vec<String>,
}

#[derive(Debug, Serialize)]
struct LaunchRequest<'a> {
    user_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    assignment_id: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct Thread {
    id: String,
    messages: Vec<Message>,
    speakers: Map<String, Value>,
    speak_order: Vec<String>,
    current_speaker_idx: usize,
    current_turns: u32,
    max_turns: u32,
    episode_done: bool,
    rating_done: bool,
}

impl Thread {
    fn current_speaker(&self) -> Option<&str> {
        self.speak_order
            .get(self.current_speaker_idx)
            .map(String::as_str)
    }

    fn my_speaker(&self, user: &str) -> Option<&str> {
        self.speakers.get(user).and_then(Value::as_str)
    }
}

#[derive(Debug, Deserialize)]
struct Message {
    user_id: String,
    text: String,
    is_seed: bool,
    #[serde(default)]
    data: Map<String, Value>,
}

impl Message {
    fn speaker(&self) -> &str {
        self.data
            .get("speaker_id")
            .and_then(Value::as_str)
            .unwrap_or(&self.user_id)
    }
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

fn prompt_line(prompt: &str) -> io::Result<Option<String>> {
    print!("{prompt}");
    io::stdout().flush()?;

    let mut input = String::new();
    match io::stdin().read_line(&mut input) {
        Ok(0) => Ok(None),
        Ok(_) => Ok(Some(input.trim().to_owned())),
        Err(err) => Err(err),
    }
}

async fn error_message(response: reqwest::Response) -> String {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorEnvelope>(&body)
        .map(|v| v.error.message)
        .unwrap_or(body);
    format!("({status}) {message}")
}

async fn fetch_thread(request: reqwest::RequestBuilder) -> Result<Thread, String> {
    let response = request
        .send()
        .await
        .map_err(|err| format!("Connection error: {err}. Please check --api-base and server status."))?;
    if !response.status().is_success() {
        return Err(error_message(response).await);
    }
    response
        .json::<Thread>()
        .await
        .map_err(|err| format!("Unexpected response: {err}"))
}

/// Print messages from `from` onwards, returning the new count.
fn print_messages(thread: &Thread, user: &str, from: usize) -> usize {
    for message in thread.messages.iter().skip(from) {
        let line = format!("{}: {}", message.speaker(), message.text);
        if message.is_seed {
            println!("{}", line.dimmed());
        } else if message.user_id == user {
            println!("{}", line.bright_cyan());
        } else if message.speaker() == "Moderator" {
            println!("{}", line.bright_green());
        } else {
            println!("{}", line.yellow());
        }
    }
    thread.messages.len()
}

async fn ensure_user(client: &reqwest::Client, base: &str, args: &Args) {
    let Some(secret) = &args.secret else {
        return;
    };
    let response = client
        .post(format!("{base}/users"))
        .json(&json!({ "id": args.user, "secret": secret }))
        .send()
        .await;
    match response {
        Ok(resp) if resp.status().is_success() => {
            println!("{}", format!("Created user {}.", args.user).bright_green());
        }
        // Existing users are fine; the launch below reports anything else.
        Ok(_) => {}
        Err(err) => eprintln!("{}", format!("Connection error: {err}").red()),
    }
}

async fn rate(client: &reqwest::Client, base: &str, args: &Args, thread_id: &str) {
    let mut ratings = Map::new();
    for name in &args.ratings {
        let value = loop {
            match prompt_line(&format!("Rate '{name}' from 1 to 5 [Enter to skip]: ")) {
                Ok(Some(input)) if input.is_empty() => return,
                Ok(Some(input)) => match input.parse::<u8>() {
                    Ok(score @ 1..=5) => break score,
                    _ => eprintln!("{}", "Please enter a number from 1 to 5.".yellow()),
                },
                Ok(None) => return,
                Err(err) => {
                    eprintln!("{}", format!("Error: failed to read rating: {err}").red());
                    return;
                }
            }
        };
        ratings.insert(name.clone(), json!(value));
    }

    let response = client
        .post(format!("{base}/threads/{thread_id}/{}/rating", args.user))
        .json(&json!({ "ratings": ratings }))
        .send()
        .await;
    match response {
        Ok(resp) if resp.status().is_success() => {
            println!("{}", "Ratings saved. Thank you!".bright_green());
        }
        Ok(resp) => {
            let message = error_message(resp).await;
            eprintln!("{}", format!("Error: failed to save ratings {message}").red());
        }
        Err(err) => eprintln!("{}", format!("Error: failed to save ratings: {err}").red()),
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let base = args.api_base.trim_end_matches('/').to_owned();
    let client = reqwest::Client::new();

    ensure_user(&client, &base, &args).await;

    let launch_url = format!("{base}/topics/{}/launch", args.topic);
    let launch = LaunchRequest {
        user_id: &args.user,
        assignment_id: args.assignment_id.as_deref(),
    };
    let mut thread = loop {
        match fetch_thread(client.post(&launch_url).json(&launch)).await {
            Ok(thread) => break thread,
            Err(message) if message.starts_with("(503") => {
                tokio::time::sleep(POLL_INTERVAL).await;
            }
            Err(message) => {
                eprintln!("{}", format!("Launch failed {message}").red());
                std::process::exit(1);
            }
        }
    };

    let me = thread.my_speaker(&args.user).unwrap_or("?").to_owned();
    println!(
        "{}",
        format!("Joined thread {} as {me}. Type 'quit' to leave.", thread.id).bright_cyan()
    );
    let mut shown = print_messages(&thread, &args.user, 0);
    let thread_url = format!("{base}/threads/{}", thread.id);
    let message_url = format!("{thread_url}/{}/message", args.user);

    while !thread.episode_done {
        if thread.current_speaker() != Some(me.as_str()) {
            tokio::time::sleep(POLL_INTERVAL).await;
            match fetch_thread(client.get(&thread_url)).await {
                Ok(updated) => thread = updated,
                Err(message) => eprintln!("{}", message.red()),
            }
            shown = print_messages(&thread, &args.user, shown);
            continue;
        }

        let input = match prompt_line(&format!(
            "{} ",
            format!("[{}/{}] {me}:", thread.current_turns + 1, thread.max_turns).bright_cyan()
        )) {
            Ok(Some(value)) => value,
            Ok(None) => break,
            Err(err) => {
                eprintln!("{}", format!("Failed to read input: {err}").red());
                continue;
            }
        };
        if input.is_empty() {
            continue;
        }
        if matches!(input.as_str(), "quit" | "exit") {
            return;
        }

        let request = client
            .post(&message_url)
            .json(&json!({ "text": input, "speaker_id": me }));
        match fetch_thread(request).await {
            Ok(updated) => {
                thread = updated;
                // Our own line was echoed by the terminal already.
                shown += 1;
                shown = print_messages(&thread, &args.user, shown);
            }
            Err(message) => eprintln!("{}", format!("Message rejected {message}").red()),
        }
    }

    println!("{}", "The conversation is over.".bright_cyan());
    if !thread.rating_done {
        rate(&client, &base, &args, &thread.id).await;
    }
}

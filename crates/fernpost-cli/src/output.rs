//! Output formatting for CLI
//!
//! Provides consistent output formatting across all commands:
//! - Human-readable default output
//! - JSON output (--json flag)
//! - Quiet mode for scripting (--quiet flag)

use std::time::Duration;

use fernpost_core::{Address, Document, Fingerprint, ParseStats, ResourceMetadata, ResourceState};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output (default)
    Human,
    /// JSON output
    Json,
    /// Quiet mode - minimal output
    Quiet,
}

impl OutputFormat {
    /// Create format from CLI flags
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        if quiet {
            OutputFormat::Quiet
        } else if json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }
}

/// Output helper for consistent formatting
pub struct Output {
    /// The output format
    pub format: OutputFormat,
}

impl Output {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Print a document summary
    pub fn print_document(&self, document: &Document, stats: Option<ParseStats>) {
        match self.format {
            OutputFormat::Human => {
                println!("Identity: {}", document.id);
                println!("Address:  {}", document.address);
                println!("Time:     {}", document.time.format("%Y-%m-%d %H:%M:%S UTC"));
                if let Some(ref client) = document.client {
                    println!("Client:   {} {}", client.name, client.version);
                }
                if let Some(name) = display_name(document) {
                    println!("Name:     {}", name);
                }
                println!();
                println!("Posts:    {}", document.posts.len());
                println!("Replies:  {}", document.replies.len());
                println!("Albums:   {}", document.root_album.descendants().len());
                println!("Images:   {}", document.root_album.all_images().len());
                println!("Friends:  {}", document.friends.len());

                if !document.posts.is_empty() {
                    println!();
                    println!("── Posts ──");
                    for post in &document.posts {
                        let replies = document.replies_to(&post.id).len();
                        let replies_indicator = if replies == 0 {
                            String::new()
                        } else {
                            format!(" [{}]", replies)
                        };
                        println!(
                            "[{}] {}{}",
                            post.time.format("%Y-%m-%d"),
                            truncate_line(&post.text, 60),
                            replies_indicator
                        );
                    }
                }

                if let Some(mean) = stats.and_then(|s| s.mean()) {
                    println!();
                    println!("Parsed in {}", format_duration(mean));
                }
            }
            OutputFormat::Json => {
                let mut value = serde_json::json!({
                    "id": document.id,
                    "address": document.address.to_string(),
                    "edition": document.edition(),
                    "time": document.time,
                    "client": document.client,
                    "profile": document.profile,
                    "counts": {
                        "posts": document.posts.len(),
                        "replies": document.replies.len(),
                        "albums": document.root_album.descendants().len(),
                        "images": document.root_album.all_images().len(),
                        "friends": document.friends.len()
                    }
                });
                if let Some(mean) = stats.and_then(|s| s.mean()) {
                    value["parse_micros"] = serde_json::json!(mean.as_micros() as u64);
                }
                println!("{}", value);
            }
            OutputFormat::Quiet => {
                println!("{}", document.address);
            }
        }
    }

    pub fn print_fingerprint(&self, fingerprint: &Fingerprint) {
        match self.format {
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({"fingerprint": fingerprint.to_string()})
                );
            }
            OutputFormat::Human | OutputFormat::Quiet => println!("{}", fingerprint),
        }
    }

    /// Print the address an insert ended up at
    pub fn print_published(&self, address: &Address, duration: Duration) {
        match self.format {
            OutputFormat::Human => {
                println!("✓ Inserted {} in {}", address, format_duration(duration));
            }
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({
                        "status": "success",
                        "address": address.to_string(),
                        "edition": address.edition,
                        "duration_ms": duration.as_millis() as u64
                    })
                );
            }
            OutputFormat::Quiet => println!("{}", address),
        }
    }

    /// Print the outcome of a resource lookup
    pub fn print_resource(&self, link: &str, state: &ResourceState) {
        match self.format {
            OutputFormat::Human => match state {
                ResourceState::Loaded(ResourceMetadata::Image {
                    mime_type,
                    width,
                    height,
                }) => {
                    println!("Link:  {}", link);
                    println!("Image: {} ({}x{})", mime_type, width, height);
                }
                ResourceState::Loaded(ResourceMetadata::Html { title, description }) => {
                    println!("Link:        {}", link);
                    println!("Title:       {}", title.as_deref().unwrap_or("(none)"));
                    if let Some(ref description) = description {
                        println!("Description: {}", truncate(description, 70));
                    }
                }
                ResourceState::Loading => println!("{}: still loading", link),
                ResourceState::Failed => println!("{}: could not be loaded", link),
            },
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({"link": link, "state": state})
                );
            }
            OutputFormat::Quiet => {
                let label = match state {
                    ResourceState::Loaded(metadata) => match metadata {
                        ResourceMetadata::Image { .. } => "image",
                        ResourceMetadata::Html { .. } => "html",
                    },
                    ResourceState::Loading => "loading",
                    ResourceState::Failed => "failed",
                };
                println!("{}", label);
            }
        }
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        match self.format {
            OutputFormat::Human => println!("✓ {}", message),
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({"status": "success", "message": message})
                );
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Print an informational message
    pub fn message(&self, msg: &str) {
        match self.format {
            OutputFormat::Human => println!("{}", msg),
            OutputFormat::Json => {
                println!("{}", serde_json::json!({"message": msg}));
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Print an error to stderr, even in quiet mode
    pub fn error(&self, error: &anyhow::Error, suggestion: Option<&str>) {
        match self.format {
            OutputFormat::Json => {
                eprintln!(
                    "{}",
                    serde_json::json!({
                        "status": "error",
                        "message": format!("{:#}", error),
                        "suggestion": suggestion
                    })
                );
            }
            OutputFormat::Human | OutputFormat::Quiet => {
                eprintln!("Error: {:#}", error);
                if let Some(suggestion) = suggestion {
                    eprintln!("Hint: {}", suggestion);
                }
            }
        }
    }
}

/// Profile name parts joined, if any are set
fn display_name(document: &Document) -> Option<String> {
    let profile = &document.profile;
    let parts: Vec<&str> = [&profile.first_name, &profile.middle_name, &profile.last_name]
        .into_iter()
        .filter_map(|part| part.as_deref())
        .collect();
    (!parts.is_empty()).then(|| parts.join(" "))
}

fn format_duration(duration: Duration) -> String {
    if duration < Duration::from_millis(1) {
        format!("{}µs", duration.as_micros())
    } else if duration < Duration::from_secs(1) {
        format!("{}ms", duration.as_millis())
    } else {
        format!("{:.1}s", duration.as_secs_f64())
    }
}

/// Truncate a string to max length, adding "..." if truncated
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len - 3).collect();
        format!("{}...", kept)
    }
}

/// Truncate to first line and max length
fn truncate_line(s: &str, max_len: usize) -> String {
    let first_line = s.lines().next().unwrap_or("");
    truncate(first_line, max_len)
}

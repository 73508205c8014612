//! Command-line subcommands and their execution against a session.

use clap::{Args, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::ops::RangeInclusive;
use std::path::PathBuf;

use crate::cache::PageSource;
use crate::cases::filter::{CaseStatus, CaseView, FilterParams, SortField, SortOrder};
use crate::cases::transport::CaseTransport;
use crate::cases::types::Case;
use crate::session::Session;
use crate::uploads::{UploadAggregator, UploadMeta};

#[derive(Subcommand, Debug)]
pub enum Command {
  /// Search cases, page by page
  Search(SearchArgs),
  /// Show one case
  Case { number: String },
  /// List the comments of a case
  Comments { number: String },
  /// List the attachments of a case
  Attachments { number: String },
  /// List the case groups of the configured account
  Groups,
  /// Post a comment on a case
  Comment { number: String, text: String },
  /// Register files as attachments of a case
  Attach {
    number: String,
    #[arg(required = true)]
    paths: Vec<PathBuf>,
  },
  /// Drop every cached response
  ClearCache,
}

#[derive(Args, Debug, Clone)]
pub struct SearchArgs {
  #[arg(long, value_enum, default_value_t)]
  pub status: CaseStatus,
  #[arg(long)]
  pub product: Option<String>,
  #[arg(long)]
  pub severity: Option<String>,
  #[arg(long)]
  pub owner: Option<String>,
  #[arg(long)]
  pub group: Option<String>,
  #[arg(long, value_enum, default_value_t)]
  pub sort: SortField,
  #[arg(long, value_enum, default_value_t)]
  pub order: SortOrder,
  #[arg(long)]
  pub keyword: Option<String>,
  /// all, mine or group:<id>
  #[arg(long, default_value = "all")]
  pub view: CaseView,
  /// Include cases the account is associated with
  #[arg(long)]
  pub associate: bool,
  /// First page to print (1-based)
  #[arg(long, default_value_t = 1)]
  pub page: usize,
  /// Number of consecutive pages to print
  #[arg(long, default_value_t = 1)]
  pub pages: usize,
  #[arg(long)]
  pub page_size: Option<usize>,
}

impl SearchArgs {
  pub fn filter(&self) -> FilterParams {
    FilterParams::new()
      .with_status(self.status)
      .with_product(self.product.as_deref())
      .with_severity(self.severity.as_deref())
      .with_owner(self.owner.as_deref())
      .with_group(self.group.as_deref())
      .with_sort(self.sort, self.order)
      .with_keyword(self.keyword.as_deref())
      .with_view(self.view.clone())
      .with_associate(self.associate)
  }
}

fn source_label(source: PageSource) -> &'static str {
  match source {
    PageSource::Network => "network",
    PageSource::Cache => "cache",
    PageSource::Window => "window",
  }
}

/// Page numbers to print; the run stops at `usize::MAX` instead of overflowing.
fn page_numbers(page: usize, pages: usize) -> RangeInclusive<usize> {
  let first = page.max(1);
  first..=first.saturating_add(pages.max(1) - 1)
}

fn case_line(case: &Case) -> String {
  format!(
    "{:<10} {:<24} {:<12} {}",
    case.case_number,
    case.status,
    case.severity.as_deref().unwrap_or("-"),
    case.summary
  )
}

/// Execute `command`, printing results to stdout.
pub async fn run<X: CaseTransport>(command: Command, session: &Session<X>, account: &str) -> Result<()> {
  match command {
    Command::Search(args) => {
      let mut search = session.search(args.filter());
      if let Some(size) = args.page_size {
        search = search.with_page_size(size);
      }

      for number in page_numbers(args.page, args.pages) {
        let page = search.request_page(number).await?;
        println!(
          "page {} ({} of {} cases, from {})",
          page.number,
          page.items.len(),
          page
            .total
            .map(|t| t.to_string())
            .unwrap_or_else(|| "?".to_string()),
          source_label(page.source)
        );
        for case in &page.items {
          println!("{}", case_line(case));
        }
        if page.complete && page.items.len() < page.page_size {
          break;
        }
      }
    }
    Command::Case { number } => {
      let case = session.case(&number).await?;
      let c = &case.data;
      println!("{}", case_line(c));
      println!("  product:  {}", c.product.as_deref().unwrap_or("-"));
      println!("  version:  {}", c.version.as_deref().unwrap_or("-"));
      println!("  owner:    {}", c.owner.as_deref().unwrap_or("-"));
      println!("  contact:  {}", c.contact_name.as_deref().unwrap_or("-"));
      println!("  modified: {}", c.last_modified_date.as_deref().unwrap_or("-"));
      if let Some(cached_at) = case.cached_at {
        println!("  (cached {})", cached_at.format("%Y-%m-%d %H:%M:%S"));
      }
    }
    Command::Comments { number } => {
      let comments = session.comments(&number).await?;
      for comment in &comments.data {
        println!(
          "[{}] {}:",
          comment.created_date.as_deref().unwrap_or("-"),
          comment.created_by.as_deref().unwrap_or("unknown")
        );
        println!("{}\n", comment.text);
      }
    }
    Command::Attachments { number } => {
      let attachments = session.attachments(&number).await?;
      for a in &attachments.data {
        println!("{:<38} {:>12} {}", a.uuid, a.length, a.file_name);
      }
    }
    Command::Groups => {
      let groups = session.groups(account).await?;
      for g in &groups.data {
        let default = if g.is_default { " (default)" } else { "" };
        println!("{:<10} {}{}", g.number, g.name, default);
      }
    }
    Command::Comment { number, text } => {
      let text = text.trim();
      if text.is_empty() {
        return Err(eyre!("Comment text is empty"));
      }
      let comment = session.post_comment(&number, text).await?;
      println!("posted comment {} on case {}", comment.id, number);
    }
    Command::Attach { number, paths } => {
      let files = paths
        .iter()
        .map(|p| UploadMeta::from_path(p))
        .collect::<Result<Vec<_>>>()?;

      let uploads = UploadAggregator::new(session.clone());
      let mut failed = 0;
      for (meta, result) in files.iter().zip(uploads.upload_all(&number, &files).await) {
        match result {
          Ok(_) => println!("attached {} ({} bytes)", meta.file_name, meta.length),
          Err(e) => {
            failed += 1;
            eprintln!("failed to attach {}: {}", meta.file_name, e);
          }
        }
      }
      if failed > 0 {
        return Err(eyre!("{} of {} attachments failed", failed, files.len()));
      }
    }
    Command::ClearCache => {
      session.logout();
      println!("cache cleared");
    }
  }

  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use clap::Parser;

  #[derive(Parser, Debug)]
  struct Cli {
    #[command(subcommand)]
    command: Command,
  }

  fn parse(args: &[&str]) -> Command {
    Cli::try_parse_from(std::iter::once("casesync").chain(args.iter().copied()))
      .unwrap()
      .command
  }

  #[test]
  fn test_search_defaults() {
    let Command::Search(args) = parse(&["search"]) else {
      panic!("expected search");
    };
    assert_eq!(args.filter(), FilterParams::new());
    assert_eq!(args.page, 1);
    assert_eq!(args.pages, 1);
  }

  #[test]
  fn test_search_flags_build_filter() {
    let Command::Search(args) = parse(&[
      "search",
      "--status",
      "closed",
      "--sort",
      "case-number",
      "--order",
      "asc",
      "--keyword",
      "  kernel panic ",
      "--view",
      "group:42",
      "--associate",
    ]) else {
      panic!("expected search");
    };

    let expected = FilterParams::new()
      .with_status(CaseStatus::Closed)
      .with_sort(SortField::CaseNumber, SortOrder::Asc)
      .with_keyword(Some("kernel panic"))
      .with_view(CaseView::Group("42".to_string()))
      .with_associate(true);
    assert_eq!(args.filter(), expected);
  }

  #[test]
  fn test_page_numbers() {
    assert_eq!(page_numbers(0, 0), 1..=1);
    assert_eq!(page_numbers(3, 2), 3..=4);
    assert_eq!(page_numbers(usize::MAX, 3), usize::MAX..=usize::MAX);
    assert_eq!(page_numbers(usize::MAX - 1, 5).count(), 2);
  }

  #[test]
  fn test_huge_page_flag_parses() {
    let max = usize::MAX.to_string();
    let Command::Search(args) = parse(&["search", "--page", &max, "--pages", "2"]) else {
      panic!("expected search");
    };
    assert_eq!(page_numbers(args.page, args.pages).count(), 1);
  }

  #[test]
  fn test_attach_requires_paths() {
    let result = Cli::try_parse_from(["casesync", "attach", "00000001"]);
    assert!(result.is_err());
  }

  #[test]
  fn test_bad_view_rejected() {
    let result = Cli::try_parse_from(["casesync", "search", "--view", "everything"]);
    assert!(result.is_err());
  }
}

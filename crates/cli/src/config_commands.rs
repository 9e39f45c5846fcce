use anyhow::Result;

use {
    strata_common::AppInfo,
    strata_config::{Error, Messages},
};

use crate::methods::{self, ServiceConfig};

/// ANSI color codes.
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";
const RESET: &str = "\x1b[0m";

pub fn check(app: AppInfo, file: &str, print: bool, raw: bool) -> Result<()> {
    let cx = methods::context(app)?;
    eprintln!("Checking {file}\n");

    let mut cfg: ServiceConfig = match cx.load_file(file) {
        Ok(cfg) => cfg,
        Err(e) => {
            let errors = report(&e);
            eprintln!("\n{errors} error(s), configuration not loaded");
            std::process::exit(1);
        },
    };

    let outcome = methods::check(&cx, &mut cfg);

    if print {
        let text = if raw { cx.text() } else { cx.secured_text() };
        print!("{text}");
    }

    let warnings = usize::from(cx.had_warnings());
    if warnings > 0 {
        eprintln!(
            "  {BOLD}{YELLOW}warning{RESET} undefined environment variables were replaced by empty values"
        );
    }
    let errors = match &outcome {
        Ok(()) => 0,
        Err(e) => report(e),
    };

    if errors + warnings > 0 {
        eprintln!();
    }
    if errors == 0 && warnings == 0 {
        eprintln!("No issues found.");
    } else {
        eprintln!("{errors} error(s), {warnings} warning(s)");
    }

    if errors > 0 {
        std::process::exit(1);
    }

    Ok(())
}

pub fn expand(app: AppInfo, file: &str) -> Result<()> {
    let cx = methods::context(app)?;
    if let Err(e) = cx.load_file::<ServiceConfig>(file) {
        report(&e);
        std::process::exit(1);
    }
    print!("{}", cx.secured_text());
    Ok(())
}

/// Print one line per problem carried by `err`, returning how many.
fn report(err: &Error) -> usize {
    let problems = match err {
        Error::Decode { source, listing } => {
            eprintln!("  {BOLD}{RED}error{RESET} {source}");
            eprintln!("{DIM}{listing}{RESET}");
            return 1;
        },
        Error::Preprocess(m) | Error::Validation(m) => m.clone(),
        other => {
            let mut m = Messages::new();
            m.push(other.to_string());
            m
        },
    };

    for problem in problems.iter() {
        eprintln!("  {BOLD}{RED}error{RESET} {problem}");
    }
    problems.len()
}

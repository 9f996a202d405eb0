use crate::config::Config;
use crate::document::DocumentFormat;
use crate::pipeline::{collect_inputs, output_file_name, InputFile, TranslateOptions};
use crate::translate::LANGUAGES;
use console::style;
use dialoguer::{Confirm, FuzzySelect, Input, MultiSelect};
use std::fs;
use std::path::{Path, PathBuf};

pub struct InteractiveResult {
    pub inputs: Vec<InputFile>,
    pub config: Config,
    pub options: TranslateOptions,
}

pub fn run_interactive_wizard() -> anyhow::Result<InteractiveResult> {
    print_header();

    // Step 1: Check/Setup API keys
    let mut config = setup_api_keys()?;

    // Step 2: Select files
    let inputs = select_source_files(&config.input_dir)?;

    // Step 3: Select target language
    let default_idx = LANGUAGES
        .iter()
        .position(|(code, _)| *code == config.target_lang)
        .unwrap_or(0);
    config.target_lang = select_language("Translate to:", default_idx)?;

    let options = TranslateOptions::from_config(&config);

    // Step 4: Confirm
    print_summary(&inputs, &options);

    if !Confirm::new()
        .with_prompt("Proceed with these settings?")
        .default(true)
        .interact()?
    {
        anyhow::bail!("Cancelled by user");
    }

    println!();

    Ok(InteractiveResult {
        inputs,
        config,
        options,
    })
}

fn print_header() {
    println!();
    println!(
        "{}",
        style("╔═══════════════════════════════════════════════════╗").cyan()
    );
    println!(
        "{}",
        style("║         gemtranslate - AI File Translator         ║").cyan()
    );
    println!(
        "{}",
        style("╚═══════════════════════════════════════════════════╝").cyan()
    );
    println!();
}

fn setup_api_keys() -> anyhow::Result<Config> {
    let mut config = Config::load()?;

    if !config.api_keys.is_empty() {
        println!(
            "{} {} API key(s) configured",
            style("✓").green(),
            config.api_keys.len()
        );
        return Ok(config);
    }

    println!("{} Gemini API key not found", style("!").yellow());
    println!("  Get one at: https://aistudio.google.com/apikey\n");

    let raw: String = Input::new()
        .with_prompt("Enter your Gemini API key(s), comma-separated")
        .interact_text()?;

    if config.add_api_keys(&raw) == 0 {
        anyhow::bail!("At least one API key is required");
    }

    if Confirm::new()
        .with_prompt("Save API key(s) to config file?")
        .default(true)
        .interact()?
    {
        // Persist only what the user typed, not environment overrides
        let mut saved = Config::load_file()?;
        saved.add_api_keys(&raw);
        let path = saved.save()?;
        println!(
            "{} API key(s) saved to {}\n",
            style("✓").green(),
            path.display()
        );
    }

    Ok(config)
}

fn prompt_path() -> anyhow::Result<Vec<InputFile>> {
    let path: String = Input::new()
        .with_prompt("Enter a file or folder path")
        .interact_text()?;
    let path = PathBuf::from(path.trim());
    if !path.exists() {
        anyhow::bail!("File not found: {}", path.display());
    }

    let inputs = collect_inputs(&[path], true)?;
    if inputs.is_empty() {
        anyhow::bail!("No supported files found");
    }
    Ok(inputs)
}

fn select_source_files(input_dir: &Path) -> anyhow::Result<Vec<InputFile>> {
    println!("\n{}", style("Select files to translate:").bold());

    let files = scan_translatable_files(input_dir)?;

    if files.is_empty() {
        println!(
            "  No supported files in {}.\n",
            style(input_dir.display()).cyan()
        );
        return prompt_path();
    }

    let mut items: Vec<String> = files
        .iter()
        .map(|f| {
            let size = fs::metadata(f)
                .map(|m| format_size(m.len()))
                .unwrap_or_else(|_| "?".to_string());
            let name = f.file_name().unwrap_or_default().to_string_lossy();
            format!("{} ({})", name, size)
        })
        .collect();
    items.push("Enter custom path...".to_string());

    let selection = MultiSelect::new()
        .with_prompt("Space to toggle, Enter to confirm")
        .items(&items)
        .interact()?;

    if selection.is_empty() {
        anyhow::bail!("No files selected");
    }
    if selection.contains(&files.len()) {
        return prompt_path();
    }

    Ok(selection
        .into_iter()
        .map(|i| InputFile::new(files[i].clone()))
        .collect())
}

/// Supported files directly inside `dir`, creating the folder on first run.
fn scan_translatable_files(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    if !dir.exists() {
        fs::create_dir_all(dir)?;
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && DocumentFormat::is_supported(&path) {
            files.push(path);
        }
    }

    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;

    if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

fn select_language(prompt: &str, default: usize) -> anyhow::Result<String> {
    let mut options: Vec<String> = LANGUAGES
        .iter()
        .map(|(code, name)| format!("{} ({})", name, code))
        .collect();
    options.push("Other (enter code)...".to_string());

    let selection = FuzzySelect::new()
        .with_prompt(prompt)
        .items(&options)
        .default(default)
        .interact()?;

    if selection == LANGUAGES.len() {
        let code: String = Input::new()
            .with_prompt("Enter language code (e.g., 'sv' for Swedish)")
            .interact_text()?;
        let code = code.trim().to_lowercase();
        if code.is_empty() {
            anyhow::bail!("Language code is required");
        }
        Ok(code)
    } else {
        Ok(LANGUAGES[selection].0.to_string())
    }
}

fn print_summary(inputs: &[InputFile], options: &TranslateOptions) {
    println!("\n{}", style("═══ Summary ═══").bold());
    println!("  Files:     {}", inputs.len());
    for input in inputs.iter().take(5) {
        let name = output_file_name(
            &input.path,
            &options.target_lang,
            options.keep_original_filename,
        );
        println!(
            "    {} → {}",
            style(input.path.display()).cyan(),
            style(name).cyan()
        );
    }
    if inputs.len() > 5 {
        println!("    ... and {} more", inputs.len() - 5);
    }
    println!("  Language:  {}", get_language_name(&options.target_lang));
    println!("  Output:    {}", options.output_dir.display());
    println!("  Workers:   {}", options.workers);
    println!();
}

fn get_language_name(code: &str) -> String {
    LANGUAGES
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(c, n)| format!("{} ({})", n, c))
        .unwrap_or_else(|| code.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(500), "500 B");
        assert_eq!(format_size(1024), "1.0 KB");
        assert_eq!(format_size(1536 * 1024), "1.5 MB");
    }

    #[test]
    fn test_get_language_name() {
        assert_eq!(get_language_name("vi"), "Vietnamese (vi)");
        assert_eq!(get_language_name("ja"), "Japanese (ja)");
        assert_eq!(get_language_name("sv"), "sv");
    }

    #[test]
    fn test_scan_translatable_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.yml"), "a: b").unwrap();
        fs::write(dir.path().join("a.json"), "{}").unwrap();
        fs::write(dir.path().join("movie.mp4"), "").unwrap();

        let files = scan_translatable_files(dir.path()).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|f| f.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.json", "b.yml"]);
    }

    #[test]
    fn test_scan_creates_missing_input_dir() {
        let dir = tempfile::tempdir().unwrap();
        let input_dir = dir.path().join("input_files");
        assert!(scan_translatable_files(&input_dir).unwrap().is_empty());
        assert!(input_dir.is_dir());
    }
}

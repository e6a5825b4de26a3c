//! Interface de terminal do hireloop: spinner de progresso e saída colorida.
//!
//! Usa `indicatif` para o spinner que acompanha uma rodada e `console` para
//! estilizar tabelas de candidatos, candidaturas e log de auditoria.

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use hireloop::controller::{RunReport, RunStatus};
use hireloop::state_machine::{
    ApplicationRecord, AttemptOutcome, CandidateOutcome, JobCandidate, LogEntry, LogLevel,
};
use hireloop::store::{StorageInfo, StoreStats};

/// Indicador visual de uma rodada em andamento.
///
/// O spinner mostra a fase e os contadores publicados pelo controlador;
/// o resultado final aparece em verde (sucesso), vermelho (falha) ou
/// amarelo (parada solicitada).
pub struct RunProgress {
    pb: ProgressBar,
    green: Style,
    red: Style,
    yellow: Style,
}

impl RunProgress {
    pub fn start() -> Self {
        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
            pb.set_style(style);
        }
        pb.set_message("starting run");
        pb.enable_steady_tick(std::time::Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
        }
    }

    /// Atualiza a mensagem do spinner a partir do status publicado.
    pub fn update(&self, status: &RunStatus) {
        let c = &status.counts;
        self.pb.set_message(format!(
            "{:<11} found {} · queued {} · applied {} · skipped {} · failed {} · today {}",
            status.phase.to_string(),
            c.found,
            c.queued,
            c.applied,
            c.skipped,
            c.failed,
            status.applied_today
        ));
    }

    /// Finaliza o spinner e imprime o resumo da rodada.
    pub fn finish(&self, report: &RunReport) {
        self.pb.finish_and_clear();
        let c = &report.counts;
        let summary = format!(
            "{} applied, {} skipped, {} failed ({} found)",
            c.applied, c.skipped, c.failed, c.found
        );
        match (&report.error, report.stopped) {
            (Some(error), _) => {
                println!("  {} Run failed: {error}", self.red.apply_to("✗"));
                println!("    {summary}");
            }
            (None, true) => println!("  {} Run stopped: {summary}", self.yellow.apply_to("■")),
            (None, false) => println!("  {} Run complete: {summary}", self.green.apply_to("✓")),
        }
    }
}

pub fn print_stats(stats: &StoreStats, max_per_day: u32) {
    let bold = Style::new().bold();
    println!("{}", bold.apply_to("─── hireloop status ───"));
    println!("  applied today      {}/{max_per_day}", stats.applied_today);
    println!("  applied total      {}", stats.applied_total);
    println!("  failed attempts    {}", stats.failed_total);
    println!("  candidates         {} ({} pending)", stats.candidates, stats.pending);
    println!("  organizations      {}", stats.unique_organizations);
    match stats.last_application {
        Some(at) => println!("  last application   {}", at.format("%Y-%m-%d %H:%M UTC")),
        None => println!("  last application   never"),
    }
}

pub fn print_candidates(candidates: &[JobCandidate]) {
    if candidates.is_empty() {
        println!("No candidates.");
        return;
    }
    for c in candidates {
        let style = match c.outcome {
            CandidateOutcome::Applied => Style::new().green(),
            CandidateOutcome::Failed => Style::new().red(),
            CandidateOutcome::Skipped => Style::new().dim(),
            CandidateOutcome::Pending => Style::new(),
        };
        let score = c
            .match_score
            .map_or_else(|| "  -  ".to_string(), |s| format!("{s:.3}"));
        println!(
            "{} {score} {:<8} {} @ {} ({})",
            style.apply_to(format!("{:<38}", c.id)),
            c.outcome.to_string(),
            c.title,
            c.organization,
            c.location
        );
        if let Some(reason) = &c.skip_reason {
            println!("{:>47}{}", "", Style::new().dim().apply_to(reason));
        }
    }
}

pub fn print_applications(records: &[ApplicationRecord]) {
    if records.is_empty() {
        println!("No applications.");
        return;
    }
    for r in records {
        let marker = match r.outcome {
            AttemptOutcome::Succeeded => Style::new().green().apply_to("✓"),
            AttemptOutcome::Skipped => Style::new().yellow().apply_to("–"),
            AttemptOutcome::Failed => Style::new().red().apply_to("✗"),
        };
        let detail = match (&r.error, &r.message) {
            (Some(class), Some(msg)) => format!("[{class}] {msg}"),
            (None, Some(msg)) => msg.clone(),
            _ => String::new(),
        };
        println!(
            "{marker} {} {} #{} {}ms {detail}",
            r.submitted_at.format("%Y-%m-%d %H:%M:%S"),
            r.candidate_id,
            r.attempt,
            r.latency_ms
        );
    }
}

pub fn print_logs(entries: &[LogEntry]) {
    for e in entries {
        let level = match e.level {
            LogLevel::Debug => Style::new().dim().apply_to("DEBUG"),
            LogLevel::Info => Style::new().cyan().apply_to(" INFO"),
            LogLevel::Warn => Style::new().yellow().apply_to(" WARN"),
            LogLevel::Error => Style::new().red().bold().apply_to("ERROR"),
        };
        let subject = e.candidate_id.as_deref().unwrap_or("-");
        println!(
            "{} {level} {:<10} {subject} {}",
            e.timestamp.format("%Y-%m-%d %H:%M:%S"),
            e.module,
            e.message
        );
    }
}

pub fn print_storage_info(info: &StorageInfo) {
    let bold = Style::new().bold();
    println!("{}", bold.apply_to(format!("─── {} ───", info.data_dir.display())));
    for repo in &info.repositories {
        println!("  {:<18} {:>6} records  {:>9} bytes", repo.file, repo.records, repo.bytes);
    }
    println!("  backups            {}", info.backups);
}

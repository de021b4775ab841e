use colored::Colorize;
use stackflow_container::{CleanupPlan, Prompter, ResourceKind};
use std::io::{self, BufRead, Write};

/// 端末から y/N と "yes" を読み取る
pub struct LinePrompter<R, W> {
    input: R,
    output: W,
}

impl LinePrompter<io::StdinLock<'static>, io::Stdout> {
    pub fn stdio() -> Self {
        Self::new(io::stdin().lock(), io::stdout())
    }
}

impl<R: BufRead, W: Write> LinePrompter<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    /// 1行読む（EOF や読み取り失敗は空文字）
    fn read_answer(&mut self, prompt: &str) -> String {
        let _ = write!(self.output, "{}", prompt);
        let _ = self.output.flush();

        let mut answer = String::new();
        if let Err(e) = self.input.read_line(&mut answer) {
            tracing::warn!(error = %e, "Failed to read answer");
            return String::new();
        }
        answer.trim().to_string()
    }
}

impl<R: BufRead, W: Write> Prompter for LinePrompter<R, W> {
    fn ask(&mut self, question: &str) -> bool {
        let answer = self.read_answer(&format!("{} [y/N]: ", question));
        answer.eq_ignore_ascii_case("y") || answer.eq_ignore_ascii_case("yes")
    }

    fn confirm_destructive(&mut self, plan: &CleanupPlan) -> bool {
        let _ = writeln!(self.output);
        let _ = writeln!(
            self.output,
            "{}",
            "⚠ 以下のボリュームを削除します。データは復元できません:".yellow().bold()
        );
        for resource in plan
            .resources
            .iter()
            .filter(|r| r.kind == ResourceKind::Volume)
        {
            let _ = writeln!(self.output, "  • {}", resource.name);
        }

        self.read_answer("続行するには yes と入力してください: ") == "yes"
    }
}

//! 工作记忆：一次计划执行内可见的任务、步骤结果与失败说明
//!
//! 不持久化；reason / respond 步骤每次都按依赖关系重新组装。

#[derive(Clone, Debug)]
pub struct WorkingMemory {
    task: String,
    results: Vec<String>,
    failures: Vec<String>,
}

impl WorkingMemory {
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            results: Vec::new(),
            failures: Vec::new(),
        }
    }

    pub fn add_observation(&mut self, result: impl Into<String>) {
        self.results.push(result.into());
    }

    pub fn add_failure(&mut self, failure: impl Into<String>) {
        self.failures.push(failure.into());
    }

    /// 提示片段；有失败时要求回复中说明哪部分没有完成
    pub fn to_prompt_section(&self) -> String {
        let mut s = format!("## Task\n{}\n\n", self.task);
        if !self.results.is_empty() {
            s.push_str("## Step Results\n");
            for r in &self.results {
                s.push_str(&format!("- {r}\n"));
            }
            s.push('\n');
        }
        if !self.failures.is_empty() {
            s.push_str("## Failed Steps\n");
            for f in &self.failures {
                s.push_str(&format!("- {f}\n"));
            }
            s.push_str("Work with what is available and say plainly which part could not be completed.\n\n");
        }
        s
    }
}

//! 호스트 명령 실행
//!
//! 모든 `ip`, `tc` 호출은 [`CommandRunner`] trait을 거치므로 리졸버, reflector
//! 관리자, 정책 적용기를 호스트 네트워크 스택 없이 테스트할 수 있습니다.
//!
//! [`ShellCommand`]의 `Display`는 로그와 에러 메시지에 남는 명령줄 그대로입니다.

use std::fmt;
use std::future::Future;

use tracing::debug;

use crate::error::ShaperError;

/// 프로그램과 인자
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellCommand {
    /// 프로그램 경로 (예: `/usr/sbin/tc`)
    pub program: String,
    /// 분리된 인자 목록
    pub args: Vec<String>,
}

impl ShellCommand {
    /// 프로그램과 인자 목록으로 명령을 생성합니다.
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

impl fmt::Display for ShellCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// 종료된 명령의 stdout/stderr 합친 출력과 종료 상태
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// stdout 뒤에 stderr
    pub output: String,
    /// 종료 코드 0이면 `true`
    pub success: bool,
}

impl CommandOutput {
    /// 성공 출력
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            success: true,
        }
    }

    /// 실패 출력
    pub fn failed(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            success: false,
        }
    }
}

/// 호스트 명령 실행 trait
///
/// # Errors
///
/// 명령을 아예 실행할 수 없을 때만 `Err`(`ShaperError::CommandSpawn`)를 반환합니다.
/// 0이 아닌 종료 코드는 [`CommandOutput::success`]로 전달됩니다.
pub trait CommandRunner: Send + Sync + 'static {
    /// 명령을 끝까지 실행하고 합친 출력을 반환합니다.
    fn run(
        &self,
        command: &ShellCommand,
    ) -> impl Future<Output = Result<CommandOutput, ShaperError>> + Send;
}

/// `tokio::process` 기반 운영 실행기
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

impl ProcessRunner {
    /// 실행기를 생성합니다.
    pub fn new() -> Self {
        Self
    }
}

impl CommandRunner for ProcessRunner {
    async fn run(&self, command: &ShellCommand) -> Result<CommandOutput, ShaperError> {
        debug!(command = %command, "running host command");

        let output = tokio::process::Command::new(&command.program)
            .args(&command.args)
            .output()
            .await
            .map_err(|e| ShaperError::CommandSpawn {
                command: command.to_string(),
                reason: e.to_string(),
            })?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        Ok(CommandOutput {
            output: combined,
            success: output.status.success(),
        })
    }
}

/// 테스트용 Mock 명령 실행기
///
/// 실행된 명령을 기록하고, 명령 문자열에 대해 미리 지정한 응답을 반환합니다.
/// 지정되지 않은 명령은 빈 출력으로 성공합니다.
#[cfg(test)]
#[derive(Default)]
pub struct MockRunner {
    responses: std::sync::Mutex<Vec<(String, CommandOutput)>>,
    executed: std::sync::Mutex<Vec<String>>,
}

#[cfg(test)]
impl MockRunner {
    /// 빈 mock 실행기를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 명령 문자열과 정확히 일치할 때 반환할 응답을 등록합니다.
    pub fn respond(self, command: impl Into<String>, output: CommandOutput) -> Self {
        self.responses
            .lock()
            .unwrap()
            .push((command.into(), output));
        self
    }

    /// 지금까지 실행된 명령 목록을 반환합니다.
    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl CommandRunner for MockRunner {
    async fn run(&self, command: &ShellCommand) -> Result<CommandOutput, ShaperError> {
        let line = command.to_string();
        self.executed.lock().unwrap().push(line.clone());
        let responses = self.responses.lock().unwrap();
        Ok(responses
            .iter()
            .find(|(cmd, _)| *cmd == line)
            .map(|(_, out)| out.clone())
            .unwrap_or_else(|| CommandOutput::ok("")))
    }
}

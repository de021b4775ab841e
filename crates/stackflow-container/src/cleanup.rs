//! クリーンアップ（teardown）
//!
//! 状態遷移:
//!
//! ```text
//! Idle → PlanBuilt → Confirmed → Executing → Done
//!            └──────→ Aborted（確認を拒否）
//! ```
//!
//! 対話モードもフラグ指定も、同じ CleanupPlan に解決してから
//! 1つの実行関数で処理します。ボリュームを含む計画は破壊的で、
//! 明示的な確認なしには削除を1件も発行しません。

use crate::error::{ContainerError, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// リソースの種類（宣言順が削除順）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    Container,
    Image,
    DanglingImage,
    Network,
    Volume,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 5] = [
        Self::Container,
        Self::Image,
        Self::DanglingImage,
        Self::Network,
        Self::Volume,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Self::Container => "コンテナ",
            Self::Image => "イメージ",
            Self::DanglingImage => "未使用レイヤー",
            Self::Network => "ネットワーク",
            Self::Volume => "ボリューム",
        }
    }

    /// 削除するとデータが失われるか
    pub fn is_destructive(&self) -> bool {
        matches!(self, Self::Volume)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resource {
    pub kind: ResourceKind,
    /// 削除に使う識別子
    pub id: String,
    /// 表示名
    pub name: String,
}

impl Resource {
    pub fn new(kind: ResourceKind, id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
            name: name.into(),
        }
    }
}

/// 削除対象の列挙と削除
#[allow(async_fn_in_trait)]
pub trait ResourceStore {
    async fn discover(&self, kind: ResourceKind) -> Result<Vec<Resource>>;
    async fn remove(&self, resource: &Resource) -> Result<()>;
}

/// ユーザーへの問い合わせ
pub trait Prompter {
    /// y/N の質問
    fn ask(&mut self, question: &str) -> bool;
    /// 破壊的な計画の最終確認（"yes" の入力を求める）
    fn confirm_destructive(&mut self, plan: &CleanupPlan) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupMode {
    /// イメージ・ボリュームを含めるかを尋ねる
    Interactive,
    /// 全種類（ボリュームを含む）
    All,
    /// イメージと未使用レイヤーのみ
    Images,
}

impl CleanupMode {
    /// 対象とするリソース種別を決める
    pub fn resolve_kinds(&self, prompter: &mut impl Prompter) -> Vec<ResourceKind> {
        match self {
            Self::All => ResourceKind::ALL.to_vec(),
            Self::Images => vec![ResourceKind::Image, ResourceKind::DanglingImage],
            Self::Interactive => {
                let mut kinds = vec![ResourceKind::Container, ResourceKind::Network];
                if prompter.ask("スタックのイメージも削除しますか？") {
                    kinds.extend([ResourceKind::Image, ResourceKind::DanglingImage]);
                }
                if prompter.ask("ボリュームも削除しますか？（データは復元できません）") {
                    kinds.push(ResourceKind::Volume);
                }
                kinds.sort();
                kinds
            }
        }
    }
}

/// 解決済みの削除計画
#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanupPlan {
    pub resources: Vec<Resource>,
    pub destructive: bool,
    pub confirmed: bool,
}

impl CleanupPlan {
    pub fn new(mut resources: Vec<Resource>) -> Self {
        resources.sort_by_key(|r| r.kind);
        let destructive = resources.iter().any(|r| r.kind.is_destructive());
        Self {
            resources,
            destructive,
            confirmed: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn count(&self, kind: ResourceKind) -> usize {
        self.resources.iter().filter(|r| r.kind == kind).count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupState {
    Idle,
    PlanBuilt,
    Confirmed,
    Executing,
    Done,
    Aborted,
}

impl CleanupState {
    fn name(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::PlanBuilt => "PlanBuilt",
            Self::Confirmed => "Confirmed",
            Self::Executing => "Executing",
            Self::Done => "Done",
            Self::Aborted => "Aborted",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct KindTally {
    pub removed: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanupReport {
    pub tallies: BTreeMap<ResourceKind, KindTally>,
    pub failures: Vec<(Resource, String)>,
}

impl CleanupReport {
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    pub fn total_removed(&self) -> usize {
        self.tallies.values().map(|t| t.removed).sum()
    }

    pub fn total_failed(&self) -> usize {
        self.tallies.values().map(|t| t.failed).sum()
    }
}

pub struct CleanupController<'a, S> {
    store: &'a S,
    state: CleanupState,
    plan: CleanupPlan,
}

impl<'a, S: ResourceStore> CleanupController<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self {
            store,
            state: CleanupState::Idle,
            plan: CleanupPlan::default(),
        }
    }

    pub fn state(&self) -> CleanupState {
        self.state
    }

    pub fn plan(&self) -> &CleanupPlan {
        &self.plan
    }

    fn expect_state(&self, expected: CleanupState, action: &'static str) -> Result<()> {
        if self.state != expected {
            return Err(ContainerError::InvalidTransition {
                from: self.state.name(),
                action,
            });
        }
        Ok(())
    }

    /// Idle → PlanBuilt: 対象リソースを列挙する
    pub async fn build_plan(&mut self, kinds: &[ResourceKind]) -> Result<&CleanupPlan> {
        self.expect_state(CleanupState::Idle, "build_plan")?;

        let mut resources = Vec::new();
        for kind in kinds {
            let found = self.store.discover(*kind).await?;
            tracing::debug!(kind = ?kind, count = found.len(), "Discovered resources");
            resources.extend(found);
        }

        self.plan = CleanupPlan::new(resources);
        self.state = CleanupState::PlanBuilt;
        Ok(&self.plan)
    }

    /// PlanBuilt → Confirmed / Aborted
    ///
    /// 非破壊的な計画は問い合わせずに確定する。
    /// 破壊的な計画は `assume_yes` か明示的な確認が必要。
    pub fn confirm(&mut self, prompter: &mut impl Prompter, assume_yes: bool) -> Result<bool> {
        self.expect_state(CleanupState::PlanBuilt, "confirm")?;

        let confirmed = !self.plan.destructive || assume_yes || prompter.confirm_destructive(&self.plan);
        self.plan.confirmed = confirmed;
        self.state = if confirmed {
            CleanupState::Confirmed
        } else {
            tracing::info!("Cleanup declined by user");
            CleanupState::Aborted
        };
        Ok(confirmed)
    }

    /// Confirmed → Executing → Done: 各リソースを独立に削除する
    pub async fn execute(&mut self) -> Result<CleanupReport> {
        self.expect_state(CleanupState::Confirmed, "execute")?;
        self.state = CleanupState::Executing;

        let mut report = CleanupReport::default();
        for resource in &self.plan.resources {
            let tally = report.tallies.entry(resource.kind).or_default();
            match self.store.remove(resource).await {
                Ok(()) => {
                    tally.removed += 1;
                    tracing::info!(kind = ?resource.kind, name = %resource.name, "Removed");
                }
                Err(e) => {
                    tally.failed += 1;
                    tracing::warn!(kind = ?resource.kind, name = %resource.name, error = %e, "Failed to remove");
                    report.failures.push((resource.clone(), e.to_string()));
                }
            }
        }

        self.state = CleanupState::Done;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeStore {
        resources: Vec<Resource>,
        fail_on: Vec<&'static str>,
        removed: Mutex<Vec<String>>,
    }

    impl FakeStore {
        fn with(resources: &[(ResourceKind, &str)]) -> Self {
            Self {
                resources: resources
                    .iter()
                    .map(|(kind, name)| Resource::new(*kind, *name, *name))
                    .collect(),
                ..Default::default()
            }
        }

        fn removal_attempts(&self) -> Vec<String> {
            self.removed.lock().unwrap().clone()
        }
    }

    impl ResourceStore for FakeStore {
        async fn discover(&self, kind: ResourceKind) -> Result<Vec<Resource>> {
            Ok(self
                .resources
                .iter()
                .filter(|r| r.kind == kind)
                .cloned()
                .collect())
        }

        async fn remove(&self, resource: &Resource) -> Result<()> {
            self.removed.lock().unwrap().push(resource.name.clone());
            if self.fail_on.contains(&resource.name.as_str()) {
                return Err(ContainerError::DockerApiError("image is in use".into()));
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct ScriptedPrompter {
        answers: Vec<bool>,
        confirm: bool,
        questions: usize,
        confirmations: usize,
    }

    impl Prompter for ScriptedPrompter {
        fn ask(&mut self, _question: &str) -> bool {
            let answer = self.answers.get(self.questions).copied().unwrap_or(false);
            self.questions += 1;
            answer
        }

        fn confirm_destructive(&mut self, _plan: &CleanupPlan) -> bool {
            self.confirmations += 1;
            self.confirm
        }
    }

    fn sample_store() -> FakeStore {
        FakeStore::with(&[
            (ResourceKind::Volume, "demo_db"),
            (ResourceKind::Network, "demo_default"),
            (ResourceKind::Image, "demo/api:latest"),
            (ResourceKind::Container, "demo-api-1"),
            (ResourceKind::DanglingImage, "0123456789ab"),
        ])
    }

    #[tokio::test]
    async fn test_non_destructive_plan_never_prompts() {
        let store = sample_store();
        let mut prompter = ScriptedPrompter::default();
        let mut controller = CleanupController::new(&store);

        let kinds = CleanupMode::Images.resolve_kinds(&mut prompter);
        let plan = controller.build_plan(&kinds).await.unwrap();
        assert!(!plan.destructive);

        assert!(controller.confirm(&mut prompter, false).unwrap());
        assert_eq!(prompter.questions, 0);
        assert_eq!(prompter.confirmations, 0);

        let report = controller.execute().await.unwrap();
        assert_eq!(report.total_removed(), 2);
        assert_eq!(controller.state(), CleanupState::Done);
    }

    #[tokio::test]
    async fn test_destructive_plan_requires_confirmation_before_any_removal() {
        let store = sample_store();
        let mut prompter = ScriptedPrompter::default();
        let mut controller = CleanupController::new(&store);

        controller.build_plan(&ResourceKind::ALL).await.unwrap();
        assert!(controller.plan().destructive);

        assert!(!controller.confirm(&mut prompter, false).unwrap());
        assert_eq!(prompter.confirmations, 1);
        assert_eq!(controller.state(), CleanupState::Aborted);
        assert!(!controller.plan().confirmed);
        assert!(store.removal_attempts().is_empty());

        // 中断後は実行できない
        assert!(matches!(
            controller.execute().await,
            Err(ContainerError::InvalidTransition { from: "Aborted", .. })
        ));
        assert!(store.removal_attempts().is_empty());
    }

    #[tokio::test]
    async fn test_assume_yes_confirms_destructive_plan() {
        let store = sample_store();
        let mut prompter = ScriptedPrompter::default();
        let mut controller = CleanupController::new(&store);

        controller.build_plan(&ResourceKind::ALL).await.unwrap();
        assert!(controller.confirm(&mut prompter, true).unwrap());
        assert_eq!(prompter.confirmations, 0);

        controller.execute().await.unwrap();
        // 削除順: コンテナ → イメージ → 未使用レイヤー → ネットワーク → ボリューム
        assert_eq!(
            store.removal_attempts(),
            vec![
                "demo-api-1",
                "demo/api:latest",
                "0123456789ab",
                "demo_default",
                "demo_db"
            ]
        );
    }

    #[tokio::test]
    async fn test_one_failure_does_not_stop_the_batch() {
        let mut store = sample_store();
        store.fail_on = vec!["demo/api:latest"];
        let mut prompter = ScriptedPrompter::default();
        let mut controller = CleanupController::new(&store);

        controller.build_plan(&ResourceKind::ALL).await.unwrap();
        controller.confirm(&mut prompter, true).unwrap();
        let report = controller.execute().await.unwrap();

        assert_eq!(store.removal_attempts().len(), 5);
        assert!(report.has_failures());
        assert_eq!(report.total_failed(), 1);
        assert_eq!(report.total_removed(), 4);
        assert_eq!(
            report.tallies[&ResourceKind::Image],
            KindTally {
                removed: 0,
                failed: 1
            }
        );
        assert_eq!(report.failures[0].0.name, "demo/api:latest");
    }

    #[tokio::test]
    async fn test_out_of_order_transitions_are_rejected() {
        let store = sample_store();
        let mut prompter = ScriptedPrompter::default();
        let mut controller = CleanupController::new(&store);

        assert!(controller.confirm(&mut prompter, true).is_err());
        assert!(controller.execute().await.is_err());

        controller.build_plan(&[ResourceKind::Container]).await.unwrap();
        assert!(controller.build_plan(&[ResourceKind::Container]).await.is_err());
        assert!(controller.execute().await.is_err());
        assert_eq!(controller.state(), CleanupState::PlanBuilt);
    }

    #[test]
    fn test_interactive_mode_asks_for_images_and_volumes() {
        let mut prompter = ScriptedPrompter {
            answers: vec![false, true],
            ..Default::default()
        };
        let kinds = CleanupMode::Interactive.resolve_kinds(&mut prompter);

        assert_eq!(prompter.questions, 2);
        assert_eq!(
            kinds,
            vec![
                ResourceKind::Container,
                ResourceKind::Network,
                ResourceKind::Volume
            ]
        );
    }

    #[tokio::test]
    async fn test_interactive_declining_everything_skips_confirmation() {
        let store = sample_store();
        let mut prompter = ScriptedPrompter::default();
        let kinds = CleanupMode::Interactive.resolve_kinds(&mut prompter);
        let mut controller = CleanupController::new(&store);

        controller.build_plan(&kinds).await.unwrap();
        assert_eq!(controller.plan().count(ResourceKind::Container), 1);
        assert_eq!(controller.plan().count(ResourceKind::Volume), 0);
        assert!(controller.confirm(&mut prompter, false).unwrap());
        assert_eq!(prompter.confirmations, 0);
    }
}

//! ビルドステージの計画
//!
//! サービスのビルド依存（DAG）から、並列にビルドできるステージ列を求めます。
//! ステージ i に入るのは、依存がすべてステージ 0..i に含まれるサービスだけです。

use crate::error::{Result, StackError};
use crate::model::ServiceSpec;
use serde::Serialize;
use std::collections::{HashMap, HashSet};

/// 同時にビルドしてよいサービスの集まり
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuildStage {
    pub index: usize,
    pub services: Vec<ServiceSpec>,
}

impl BuildStage {
    pub fn names(&self) -> Vec<&str> {
        self.services.iter().map(|s| s.name.as_str()).collect()
    }
}

/// ビルド対象サービスをステージに分割する
///
/// - build 設定のないサービスは pull されるイメージなので依存としては充足済み扱い
/// - マニフェストにないサービスへの依存はエラー
/// - 循環依存はビルドを一切始める前にエラー
/// - ステージ内の順序は宣言順
pub fn plan_stages(services: &[ServiceSpec]) -> Result<Vec<BuildStage>> {
    let known: HashSet<&str> = services.iter().map(|s| s.name.as_str()).collect();
    let buildable: Vec<&ServiceSpec> = services.iter().filter(|s| s.is_buildable()).collect();
    let buildable_names: HashSet<&str> = buildable.iter().map(|s| s.name.as_str()).collect();

    // 未定義依存の検出と、ビルド対象間の依存グラフ構築
    let mut edges: HashMap<&str, Vec<&str>> = HashMap::new();
    for service in services {
        for dep in &service.depends_on {
            if !known.contains(dep.as_str()) {
                return Err(StackError::UnknownDependency {
                    service: service.name.clone(),
                    dependency: dep.clone(),
                });
            }
        }
    }
    for service in &buildable {
        let deps = service
            .depends_on
            .iter()
            .map(String::as_str)
            .filter(|d| buildable_names.contains(d))
            .collect();
        edges.insert(service.name.as_str(), deps);
    }

    let mut done: HashSet<&str> = HashSet::new();
    let mut remaining: Vec<&ServiceSpec> = buildable;
    let mut stages = Vec::new();

    while !remaining.is_empty() {
        let (ready, blocked): (Vec<&ServiceSpec>, Vec<&ServiceSpec>) =
            remaining.into_iter().partition(|s| {
                edges[s.name.as_str()]
                    .iter()
                    .all(|dep| done.contains(dep))
            });

        if ready.is_empty() {
            let cycle = find_cycle(&blocked, &edges);
            return Err(StackError::CircularDependency(cycle.join(" → ")));
        }

        for service in &ready {
            done.insert(service.name.as_str());
        }
        tracing::debug!(
            stage = stages.len(),
            services = ?ready.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(),
            "Planned build stage"
        );
        stages.push(BuildStage {
            index: stages.len(),
            services: ready.into_iter().cloned().collect(),
        });
        remaining = blocked;
    }

    Ok(stages)
}

/// 残ったノードから循環経路を1つ取り出す（先頭ノードを末尾にも含める）
fn find_cycle(blocked: &[&ServiceSpec], edges: &HashMap<&str, Vec<&str>>) -> Vec<String> {
    let blocked_names: HashSet<&str> = blocked.iter().map(|s| s.name.as_str()).collect();

    // 残りのノードは全て未解決の依存を持つので、依存を辿れば必ずどこかで再訪する
    let Some(start) = blocked.first().map(|s| s.name.as_str()) else {
        return Vec::new();
    };
    let mut path: Vec<&str> = vec![start];
    let mut position: HashMap<&str, usize> = HashMap::from([(start, 0)]);
    let mut current = start;

    loop {
        let next = edges
            .get(current)
            .and_then(|deps| deps.iter().copied().find(|d| blocked_names.contains(d)));
        let Some(next) = next else {
            return path.iter().map(|s| s.to_string()).collect();
        };
        if let Some(&idx) = position.get(next) {
            let mut cycle: Vec<String> = path[idx..].iter().map(|s| s.to_string()).collect();
            cycle.push(next.to_string());
            return cycle;
        }
        position.insert(next, path.len());
        path.push(next);
        current = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::BuildSpec;

    fn buildable(name: &str, deps: &[&str]) -> ServiceSpec {
        let mut spec = ServiceSpec::new(name, format!("demo/{}:latest", name));
        spec.build = Some(BuildSpec::new(name));
        spec.depends_on = deps.iter().map(|d| d.to_string()).collect();
        spec
    }

    fn stage_names(stages: &[BuildStage]) -> Vec<Vec<&str>> {
        stages.iter().map(|s| s.names()).collect()
    }

    #[test]
    fn test_shared_base_then_dependents() {
        let services = vec![
            buildable("base", &[]),
            buildable("dashboard", &["base"]),
            buildable("api", &["base"]),
        ];

        let stages = plan_stages(&services).unwrap();
        assert_eq!(
            stage_names(&stages),
            vec![vec!["base"], vec!["dashboard", "api"]]
        );
        assert_eq!(stages[1].index, 1);
    }

    #[test]
    fn test_independent_leaves_share_first_stage() {
        let services = vec![
            buildable("base", &[]),
            buildable("dashboard", &["base"]),
            buildable("nginx", &[]),
            buildable("freeradius", &[]),
        ];

        let stages = plan_stages(&services).unwrap();
        assert_eq!(
            stage_names(&stages),
            vec![vec!["base", "nginx", "freeradius"], vec!["dashboard"]]
        );
    }

    #[test]
    fn test_general_dag_orders_every_dependency_earlier() {
        let services = vec![
            buildable("d", &["b", "c"]),
            buildable("b", &["a"]),
            buildable("c", &["a"]),
            buildable("e", &["d", "a"]),
            buildable("a", &[]),
        ];

        let stages = plan_stages(&services).unwrap();
        assert_eq!(
            stage_names(&stages),
            vec![vec!["a"], vec!["b", "c"], vec!["d"], vec!["e"]]
        );

        let stage_of: HashMap<&str, usize> = stages
            .iter()
            .flat_map(|st| st.services.iter().map(move |s| (s.name.as_str(), st.index)))
            .collect();
        for service in &services {
            for dep in &service.depends_on {
                assert!(stage_of[dep.as_str()] < stage_of[service.name.as_str()]);
            }
        }
    }

    #[test]
    fn test_pulled_dependencies_are_already_satisfied() {
        let postgres = ServiceSpec::new("postgres", "postgres:16");
        let services = vec![postgres, buildable("api", &["postgres"])];

        let stages = plan_stages(&services).unwrap();
        assert_eq!(stage_names(&stages), vec![vec!["api"]]);
    }

    #[test]
    fn test_unknown_dependency_is_rejected() {
        let services = vec![buildable("api", &["ghost"])];

        let err = plan_stages(&services).unwrap_err();
        assert!(matches!(
            err,
            StackError::UnknownDependency { ref service, ref dependency }
                if service == "api" && dependency == "ghost"
        ));
    }

    #[test]
    fn test_cycle_is_rejected_with_path() {
        let services = vec![
            buildable("base", &[]),
            buildable("a", &["base", "b"]),
            buildable("b", &["c"]),
            buildable("c", &["a"]),
        ];

        let err = plan_stages(&services).unwrap_err();
        match err {
            StackError::CircularDependency(path) => {
                assert_eq!(path, "a → b → c → a");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let services = vec![buildable("loop", &["loop"])];
        assert!(matches!(
            plan_stages(&services),
            Err(StackError::CircularDependency(path)) if path == "loop → loop"
        ));
    }

    #[test]
    fn test_no_buildable_services_yields_no_stages() {
        let services = vec![ServiceSpec::new("redis", "redis:7")];
        assert!(plan_stages(&services).unwrap().is_empty());
        assert!(plan_stages(&[]).unwrap().is_empty());
    }
}

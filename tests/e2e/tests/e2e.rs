//! PGA 端到端集成测试：从策略文件到检测报告的完整流程
//!
//! ## 运行方式
//!
//! ```bash
//! cargo test -p pga-e2e-tests --test e2e
//! ```

use std::collections::BTreeMap;

use pga_detect::lookup::{
    audit_records_from_reader, project_map_from_reader, role_grants_from_reader,
};
use pga_detect::{
    FindingKind, GrantIndex, RoleLevels, SensitiveCatalog, check_authorization, check_duplicates,
    check_role_tiers, collect_tier_rows, join_observations, run_static_checks,
};
use pga_graph::{
    GraphQuery, GraphStore, NodeLabel, Relationship, build_policy_graph, import_identity,
};
use pga_e2e_tests::test_env::*;

const GRANTS: &str = "user_id,user_name,project_id,project_name,role_id,role_name\n\
                      u1,alice,p1,demo,r1,member\n\
                      u2,bob,p2,ops,r2,admin\n\
                      u3,carol,,,r2,admin\n";

// =====================================================================
// 场景 1: 重复策略（同一规则）
// =====================================================================

/// 场景 1: 同一策略键两行规则相同
///
/// 1. 策略图中只产生一个 Rule 节点
/// 2. 重复检查给出错误码 1，删除目标为第 2 行
#[test]
fn scenario_1_duplicate_policy_same_rule() {
    let env = TestEnv::new();
    let set = env.compile_text(
        "policy.yaml",
        "identity:list_users: \"role:admin\"\n\
         identity:list_users: \"role:admin\"\n",
    );

    let (graph, summary) = env.build_memory(&set);
    assert_eq!(summary.policies, 1);
    assert_eq!(summary.rules, 1);
    assert_eq!(graph.nodes(NodeLabel::Rule).unwrap().len(), 1);

    let findings = check_duplicates(&set);
    assert_eq!(codes(&findings), vec!["1"]);
    assert_eq!(
        findings[0].kind,
        FindingKind::DuplicatePolicy {
            target: "line 2: identity:list_users".into()
        }
    );

    let report = render_text(&findings, set.expression_count());
    assert!(report.contains("fault type: repeat policy"));
    assert!(report.contains("  line 1: identity:list_users\n  line 2: identity:list_users"));
    assert!(report.contains("recommendation: delete line 2: identity:list_users"));
}

// =====================================================================
// 场景 2: 重复策略（不同规则）与重复匹配单元
// =====================================================================

#[test]
fn scenario_2_divergent_policy_and_repeated_unit() {
    let env = TestEnv::new();
    let set = env.compile_text(
        "policy.yaml",
        "identity:get_user: \"role:admin or role:reader\"\n\
         identity:get_user: \"role:admin\"\n",
    );

    let findings = check_duplicates(&set);
    assert_eq!(codes(&findings), vec!["2", "3"]);
    assert_eq!(
        findings[0].kind,
        FindingKind::DivergentPolicy {
            suggestion: "(role:admin or role:reader) or (role:admin)".into()
        }
    );
    assert_eq!(findings[1].fields()["fault_unit"], "role:admin");
}

// =====================================================================
// 场景 3: 规则去重与引用展开
// =====================================================================

/// 场景 3: 两个策略共享同一条规则（经 `rule:` 别名展开后相同）
#[test]
fn scenario_3_shared_rule_across_policies() {
    let env = TestEnv::new();
    let set = env.compile_text(
        "policy.yaml",
        "admin_required: \"role:admin\"\n\
         identity:create_user: \"rule:admin_required\"\n\
         identity:delete_user: \"rule:admin_required\"\n\
         identity:get_user: \"role:reader\"\n",
    );
    assert_eq!(set.aliases.len(), 1);

    let (graph, summary) = env.build_memory(&set);
    assert_eq!(summary.policies, 3);
    assert_eq!(summary.rules, 2);
    assert_eq!(summary.shared_rules.len(), 1);
    assert_eq!(
        summary.shared_rules[0].policies,
        vec!["identity:create_user", "identity:delete_user"]
    );

    let stats = GraphQuery::new(&graph).statistics().unwrap();
    assert_eq!(stats.has_rule_relationships, 3);
    assert_eq!(stats.requires_relationships["REQUIRES_ROLE"], 2);
    assert_eq!(stats.shared_rules.len(), 1);
}

// =====================================================================
// 场景 4: 通配角色、空规则与重复条件
// =====================================================================

#[test]
fn scenario_4_wildcard_empty_and_repeated_condition() {
    let env = TestEnv::new();
    let set = env.compile_text(
        "policy.yaml",
        "identity:list_projects: \"role:*\"\n\
         identity:get_project: \"\"\n\
         identity:list_domains: \"!\"\n\
         identity:check_token: \"role:admin and role:admin\"\n",
    );

    assert_eq!(codes(&check_duplicates(&set)), vec!["9"]);

    let (graph, _) = env.build_memory(&set);
    let findings = run_static_checks(&policy_views(&graph), &SensitiveCatalog::default());
    assert_eq!(codes(&findings), vec!["4", "5"]);
    assert_eq!(findings[0].fields()["fault_info"], "role: *");
    assert_eq!(
        findings[1].policy_rule,
        vec!["line 2: identity:get_project".to_string()]
    );
}

// =====================================================================
// 场景 5: 敏感权限检查
// =====================================================================

/// 场景 5: 敏感权限清单要求 system scope、项目与角色限制
#[test]
fn scenario_5_sensitive_permissions() {
    let env = TestEnv::new();
    let set = env.compile_text(
        "policy.yaml",
        "identity:delete_user: \"role:admin or role:member\"\n\
         identity:update_user: \"role:admin and project_id:p1 and system_scope:all\"\n",
    );
    let (graph, _) = env.build_memory(&set);
    let catalog = SensitiveCatalog::from_reader(
        "policy_name,role,project_name,system_scope\n\
         identity:delete_user,admin,p1,all\n\
         update_user,admin,p1,all\n"
            .as_bytes(),
    );

    let findings = run_static_checks(&policy_views(&graph), &catalog);
    assert_eq!(codes(&findings), vec!["6", "7", "8"]);
    assert_eq!(
        findings[0].fields()["original_expr"],
        "(role:admin or role:member)"
    );
    assert_eq!(findings[1].fields()["project_placeholder"], "p1");
    assert_eq!(
        findings[2].fields()["fault_info"],
        "Policy identity:delete_user should limit roles to [admin]"
    );

    let report = render_text(&findings, set.expression_count());
    assert!(report.contains("(role:admin or role:member) and system_scope:all"));
    assert!(report.contains("(role:admin or role:member) and project_id:p1"));
}

// =====================================================================
// 场景 6: 基于审计日志的越权检查
// =====================================================================

#[test]
fn scenario_6_scope_check_from_audit_log() {
    let env = TestEnv::new();
    let set = env.compile_text(
        "policy.yaml",
        "identity:get_user: \"role:member and project_id:%(target.project.id)s\"\n\
         identity:delete_user: \"role:admin\"\n\
         identity:delete_user: \"role:member\"\n\
         identity:list_users: \"role:admin\"\n",
    );
    let (graph, _) = env.build_memory(&set);

    let grants = GrantIndex::new(&role_grants_from_reader(GRANTS.as_bytes()));
    let records = audit_records_from_reader(
        "api,user_id,project_id,authorized\n\
         identity:get_user(u2),u1,p1,yes\n\
         identity:delete_user,u2,p2,yes\n\
         identity:list_users,u1,p1,no\n"
            .as_bytes(),
    );
    let observations = join_observations(&records, &grants);
    assert_eq!(observations.len(), 2);
    assert_eq!(observations[0].api, "identity:get_user");
    assert_eq!(observations[0].role_name, "member");

    let findings = check_authorization(&policy_views(&graph), &observations);
    assert_eq!(codes(&findings), vec!["10", "11"]);
    assert_eq!(
        findings[0].kind,
        FindingKind::UnusedRule {
            api: "identity:delete_user".into(),
            rule: "role:member".into(),
        }
    );
    assert_eq!(findings[1].fields()["api"], "identity:list_users");
}

// =====================================================================
// 场景 7: 高低权限角色错配
// =====================================================================

#[test]
fn scenario_7_role_tier_mismatch() {
    let env = TestEnv::new();
    let set = env.compile_text(
        "policy.yaml",
        "identity:list_users: \"role:memberA or role:memberB or role:memberC or role:memberD or role:managerA\"\n\
         identity:delete_user: \"(role:managerA or role:managerB or role:managerC or role:managerD or role:memberA) and project_id:p1\"\n\
         identity:get_user: \"role:admin or role:memberA\"\n",
    );
    let (graph, _) = env.build_memory(&set);
    let projects = project_map_from_reader("project_id,project_name\np1,demo\n".as_bytes());

    let rows = collect_tier_rows(&policy_views(&graph), &RoleLevels::default(), &projects);
    let delete = rows
        .iter()
        .find(|r| r.api == "identity:delete_user")
        .unwrap();
    assert_eq!(delete.project_name, "demo");
    let get = rows.iter().find(|r| r.api == "identity:get_user").unwrap();
    assert_eq!(get.low_percent, 100.0);

    let findings = check_role_tiers(&rows);
    let by_api: BTreeMap<String, &'static str> = findings
        .iter()
        .map(|f| (f.fields()["api"].clone(), f.code()))
        .collect();
    assert_eq!(by_api["identity:list_users"], "12");
    assert_eq!(by_api["identity:delete_user"], "13");
    assert!(!by_api.contains_key("identity:get_user"));

    let report = render_text(&findings, set.expression_count());
    assert!(report.contains("remove roles [memberA] from identity:delete_user"));
    assert!(report.contains("identity:delete_user in project demo"));
}

// =====================================================================
// 场景 8: RocksDB 持久化与指纹幂等
// =====================================================================

/// 场景 8: 同一策略重复构建，指纹不变；内存图与 RocksDB 指纹一致
#[test]
fn scenario_8_fingerprint_is_idempotent() {
    let env = TestEnv::new();
    let set = env.compile_text(
        "policy.yaml",
        "admin_required: \"role:admin\"\n\
         identity:get_user: \"rule:admin_required or (role:reader and system_scope:all)\"\n\
         identity:list_users: \"rule:admin_required\"\n\
         identity:update_user: \"role:member and not project_id:p9\"\n",
    );
    let (memory, _) = env.build_memory(&set);
    let expected = GraphQuery::new(&memory).fingerprint().unwrap();

    {
        let mut store = env.open_rocks("graph");
        build_policy_graph(&mut store, &set.policy_dict()).unwrap();
        assert_eq!(GraphQuery::new(&store).fingerprint().unwrap(), expected);
    }

    let mut store = env.open_rocks("graph");
    assert_eq!(GraphQuery::new(&store).fingerprint().unwrap(), expected);
    store.clear_labels(&NodeLabel::POLICY_GRAPH).unwrap();
    build_policy_graph(&mut store, &set.policy_dict()).unwrap();
    assert_eq!(GraphQuery::new(&store).fingerprint().unwrap(), expected);

    let negated = store
        .edges()
        .unwrap()
        .into_iter()
        .filter(|e| e.rel.name() == "REQUIRES_NOT_PROJECT")
        .count();
    assert_eq!(negated, 1);
}

// =====================================================================
// 场景 9: 身份子图导入
// =====================================================================

/// 场景 9: User → Token → Role，系统级授权额外连接 SystemScope；
/// 重建策略图不影响身份节点
#[test]
fn scenario_9_identity_import_survives_rebuild() {
    let env = TestEnv::new();
    let set = env.compile_text("policy.yaml", "identity:get_user: \"role:admin\"\n");
    let mut store = env.open_rocks("graph");
    build_policy_graph(&mut store, &set.policy_dict()).unwrap();

    let summary = import_identity(&mut store, &role_grants_from_reader(GRANTS.as_bytes())).unwrap();
    assert_eq!(summary.users, 3);
    assert_eq!(summary.tokens, 3);
    assert_eq!(summary.roles, 2);
    assert_eq!(summary.system_scopes, 1);

    let edges = store.edges().unwrap();
    assert!(!edges.iter().any(|e| {
        e.src.label == NodeLabel::User && e.dst.label == NodeLabel::Role
    }));
    assert!(edges.iter().any(|e| e.rel == Relationship::HasSystemScope));

    store.clear_labels(&NodeLabel::POLICY_GRAPH).unwrap();
    assert!(store.nodes(NodeLabel::Policy).unwrap().is_empty());
    assert_eq!(store.nodes(NodeLabel::User).unwrap().len(), 3);
    let stats = GraphQuery::new(&store).statistics().unwrap();
    assert_eq!(stats.identity_nodes["Token"], 3);
}

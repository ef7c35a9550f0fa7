use crate::db::{ProfileStore, QuestionStore};
use crate::domain::models::{Choice, Question, UserProfile, UserRole};
use crate::state::Stores;
use anyhow::Result;
use uuid::Uuid;

struct SeedQuestion<'a> {
    question: &'a str,
    options: [&'a str; 4],
    answer: Choice,
    analysis: &'a str,
}

const QUESTION_BANK: [SeedQuestion<'static>; 10] = [
    SeedQuestion {
        question: "进入井下作业前，必须随身携带的是？",
        options: ["自救器", "手机", "打火机", "收音机"],
        answer: Choice::A,
        analysis: "自救器是井下发生火灾或有害气体事故时的个人防护装备，入井人员必须随身携带。",
    },
    SeedQuestion {
        question: "发现作业现场存在重大事故隐患时，正确的做法是？",
        options: ["继续作业", "立即停止作业并报告", "等下班后再说", "自行处理不必上报"],
        answer: Choice::B,
        analysis: "《安全生产法》规定，从业人员发现直接危及人身安全的紧急情况时，有权停止作业并立即报告。",
    },
    SeedQuestion {
        question: "\"三违\"是指违章指挥、违章作业和？",
        options: ["违反劳动纪律", "违反交通规则", "违反财务制度", "违反考勤制度"],
        answer: Choice::A,
        analysis: "\"三违\"即违章指挥、违章作业、违反劳动纪律，是导致事故的主要人为因素。",
    },
    SeedQuestion {
        question: "高处作业是指在坠落高度基准面多少米及以上有可能坠落的高处进行的作业？",
        options: ["1米", "2米", "3米", "5米"],
        answer: Choice::B,
        analysis: "按国家标准，坠落高度基准面2米及以上有可能坠落的高处作业均属于高处作业，必须系挂安全带。",
    },
    SeedQuestion {
        question: "电气设备着火时，首先应该？",
        options: ["用水扑救", "切断电源", "用湿布覆盖", "打开门窗通风"],
        answer: Choice::B,
        analysis: "电气火灾应先切断电源，再使用干粉或二氧化碳灭火器扑救，严禁直接用水。",
    },
    SeedQuestion {
        question: "爆破作业后，人员进入工作面的前提是？",
        options: ["听到炮响即可进入", "等待通风排烟并经检查确认安全", "班长同意即可", "戴上口罩即可"],
        answer: Choice::B,
        analysis: "爆破后必须经过规定的通风时间，由专人检查确认无盲炮、有害气体浓度合格后方可进入。",
    },
    SeedQuestion {
        question: "有限空间作业应当遵循的原则是？",
        options: ["先检测、再通风、后作业", "先通风、再检测、后作业", "先作业、再检测", "无需检测"],
        answer: Choice::B,
        analysis: "有限空间作业必须严格执行\"先通风、再检测、后作业\"，未经检测合格严禁作业。",
    },
    SeedQuestion {
        question: "安全帽的主要作用是？",
        options: ["防晒", "防止头部受到坠落物和碰撞伤害", "装饰", "保暖"],
        answer: Choice::B,
        analysis: "安全帽能缓冲和分散坠落物、碰撞对头部的冲击，进入生产现场必须正确佩戴并系好下颏带。",
    },
    SeedQuestion {
        question: "设备检修时，应在电源开关处悬挂的警示牌是？",
        options: ["禁止合闸，有人工作", "注意安全", "当心触电", "必须戴安全帽"],
        answer: Choice::A,
        analysis: "检修时应执行停电、验电、挂牌上锁制度，开关处悬挂\"禁止合闸，有人工作\"标示牌。",
    },
    SeedQuestion {
        question: "尾矿库的安全度等级中，最危险的是？",
        options: ["正常库", "病库", "险库", "危库"],
        answer: Choice::D,
        analysis: "尾矿库安全度分为正常库、病库、险库和危库，危库必须立即停止生产并采取抢险措施。",
    },
];

/// Boot-time seeding. Each step is skipped when its data already exists.
pub async fn seed_all(stores: &Stores, admin_email: Option<&str>, demo_profiles: bool) -> Result<()> {
    seed_questions(stores.questions.as_ref()).await?;
    if let Some(email) = admin_email {
        seed_admin(stores.profiles.as_ref(), email).await?;
    }
    if demo_profiles {
        seed_demo_profiles(stores.profiles.as_ref()).await?;
    }
    Ok(())
}

pub async fn seed_questions(store: &dyn QuestionStore) -> Result<()> {
    if !store.list().await?.is_empty() {
        return Ok(());
    }
    for (id, seed) in QUESTION_BANK.iter().enumerate() {
        let [a, b, c, d] = seed.options;
        store
            .insert(&Question {
                id: id as i64 + 1,
                question: seed.question.to_string(),
                option_a: a.to_string(),
                option_b: b.to_string(),
                option_c: Some(c.to_string()),
                option_d: Some(d.to_string()),
                answer: seed.answer,
                analysis: seed.analysis.to_string(),
            })
            .await?;
    }
    tracing::info!("Seeded {} quiz questions", QUESTION_BANK.len());
    Ok(())
}

async fn seed_admin(profiles: &dyn ProfileStore, email: &str) -> Result<()> {
    if profiles.find_by_email(email).await?.is_some() {
        return Ok(());
    }
    profiles
        .upsert(&UserProfile {
            id: Uuid::new_v4(),
            email: email.to_string(),
            display_name: "系统管理员".to_string(),
            unit: "生产技术部".to_string(),
            role: UserRole::Admin,
        })
        .await?;
    tracing::info!("Seeded admin profile {}", email);
    Ok(())
}

async fn seed_demo_profiles(profiles: &dyn ProfileStore) -> Result<()> {
    let demo = [
        ("officer@pakrut.local", "安全管理员", "质检计量部", UserRole::SafetyOfficer),
        ("worker@pakrut.local", "基层员工", "采矿厂", UserRole::Worker),
    ];
    for (email, name, unit, role) in demo {
        if profiles.find_by_email(email).await?.is_none() {
            profiles
                .upsert(&UserProfile {
                    id: Uuid::new_v4(),
                    email: email.to_string(),
                    display_name: name.to_string(),
                    unit: unit.to_string(),
                    role,
                })
                .await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn seeding_is_idempotent() {
        let stores = Stores::memory();
        seed_all(&stores, Some("admin@pakrut.com"), true).await.unwrap();
        seed_all(&stores, Some("admin@pakrut.com"), true).await.unwrap();

        assert_eq!(stores.questions.list().await.unwrap().len(), QUESTION_BANK.len());
        let admin = stores.profiles.find_by_email("admin@pakrut.com").await.unwrap().unwrap();
        assert_eq!(admin.role, UserRole::Admin);
        assert!(stores.profiles.find_by_email("worker@pakrut.local").await.unwrap().is_some());
    }

    #[test]
    fn answers_point_at_real_options() {
        for seed in QUESTION_BANK.iter() {
            assert!(!seed.options[seed.answer as usize].is_empty());
        }
    }
}

//! Constants used throughout the recognition engine.
//!
//! This module defines default geometry for glyph images, the candidate list
//! size, the fallback confidence policy, and the common-character table used
//! by the fallback tiers.

/// The default height glyph images are normalized to before feature extraction.
pub const DEFAULT_INPUT_HEIGHT: u32 = 64;

/// The default width glyph images are normalized to before feature extraction.
pub const DEFAULT_INPUT_WIDTH: u32 = 256;

/// The default hidden size of each recurrent direction.
pub const DEFAULT_HIDDEN_SIZE: usize = 256;

/// Channel widths of the seven convolutional stages of the feature extractor.
pub const DEFAULT_EXTRACTOR_CHANNELS: [usize; 7] = [64, 128, 256, 256, 512, 512, 512];

/// Number of candidates every prediction result carries.
pub const CANDIDATE_COUNT: usize = 5;

/// Number of decimal digits confidences are rounded to.
pub const CONFIDENCE_DECIMALS: i32 = 4;

/// Parameter-name prefix of the lazily shaped recurrent layer.
pub const LAZY_LAYER_PREFIX: &str = "lstm1";

/// Maximum number of extra candidates taken from an engine text after its first character.
pub const ENGINE_EXTRA_CANDIDATES: usize = 3;

/// Confidence decay per character position for engine-derived candidates.
pub const ENGINE_CANDIDATE_DECAY: f32 = 0.05;

/// Confidence assumed when the engine reports a text without a usable score.
pub const ENGINE_DEFAULT_CONFIDENCE: f32 = 0.85;

/// Starting confidence of padding samples in the engine tier.
pub const ENGINE_PAD_BASE: f32 = 0.7;

/// Confidence decay per already-present candidate for engine-tier padding.
pub const ENGINE_PAD_DECAY: f32 = 0.02;

/// Substitute confidence when the engine ran but recognized nothing.
pub const SUBSTITUTE_CONFIDENCE_EMPTY: f32 = 0.7;

/// Substitute confidence when the engine was unavailable or failed.
pub const SUBSTITUTE_CONFIDENCE_FAILED: f32 = 0.6;

/// Confidence decay per already-present candidate for substitute-tier padding.
pub const SUBSTITUTE_PAD_DECAY: f32 = 0.05;

/// Default per-call attempt boundary for bounded strategies, in milliseconds.
pub const DEFAULT_ATTEMPT_TIMEOUT_MS: u64 = 30_000;

/// Default cap on attempt workers alive at once, timed-out ones included.
pub const DEFAULT_MAX_ATTEMPT_WORKERS: usize = 16;

/// The default threshold for parallel processing.
///
/// Batches larger than this fall back per image on the rayon pool.
pub const DEFAULT_PARALLEL_THRESHOLD: usize = 4;

/// Common simplified Chinese characters used by the fallback tiers.
///
/// The table repeats some characters; [`crate::domain::FallbackVocabulary`]
/// deduplicates it while preserving first-occurrence order.
pub const COMMON_CHARACTERS: &str = "的一是了在人有我他她它这那你好世界中国人民大学学习工作生活快乐健康平安幸福美好未来梦想希望爱情友谊家庭事业成功智慧勇气力量信心信念坚持努力奋斗创新发展和谐团结互助尊重理解包容信任责任担当奉献爱心善良真诚宽容感恩谦虚正直诚实勇敢坚强乐观积极向上阳光自信热情开朗活泼大方稳重成熟优雅气质魅力智慧才华能力水平素质修养内涵品德道德礼仪礼貌文明文化艺术体育音乐美术舞蹈戏剧电影电视文学历史哲学科学技术工程医学教育经济政治法律军事外交社会自然环境生态资源能源交通通讯网络信息数据人工智能机器人自动化数字化信息化现代化全球化国际化民族传统现代时尚流行经典创意设计建筑园林景观城市乡村风景山水人物动物植物食物服装首饰装饰品工具设备器材车辆船舶飞机武器装备乐器书籍报刊杂志报纸期刊杂志网站应用程序软件游戏娱乐休闲旅游度假假期节日庆典活动聚会会议讲座演讲报告展览展示演出表演比赛竞赛考试考核评估评价表彰奖励惩罚批评教育指导培训训练辅导咨询顾问服务帮助支持协助合作协作配合参与加入退出进入离开开始结束起点终点过程结果原因结果目标方向方法方式手段工具途径渠道来源去向归属所属所有拥有占有使用利用开发保护保存维护维修修复更新升级改造改进改善提高提升增强加强强化巩固稳定平衡和谐统一完整完美美好优秀卓越杰出突出显著明显清晰明确确定肯定否定认可承认接受拒绝同意反对支持反对赞成反对喜欢讨厌爱憎善恶美丑真假虚实有无多少大小长短粗细宽窄高矮胖瘦新旧好坏对错是非黑白昼夜明暗冷热寒暑燥湿软硬强弱轻重缓急快慢先后左右上下前后内外远近高低深浅宽窄粗细长短大小多少有无增减得失成败胜负输赢生死存亡兴衰荣辱利弊祸福吉凶";

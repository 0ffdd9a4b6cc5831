//! 动力学标定数据
//!
//! 三个 CSV 数值表（逗号分隔、无表头，`#` 开头的行为注释，空行与空字段忽略）：
//!
//! - 置换矩阵 `P`（`permutationMatrix.csv`）：`10N × 10N`，满足 `Y·P = [Y_b  Y_d]`
//! - 基参数 `pi_b`（`pi_b.csv`）：`n_b ≤ 10N` 个值，`τ = Y_b · pi_b`
//! - 摩擦参数 `pi_fr`（`pi_fr.csv`）：每关节 `[fc, fv]`（`2N` 个值）或 `[fc, fv, offset]`（`3N` 个值）
//!
//! 每个连杆的标准参数顺序为 `[XX, XY, XZ, YY, YZ, ZZ, mX, mY, mZ, m]`。

use crate::DOF;
use crate::error::CalibrationError;
use nalgebra::{DMatrix, DVector, SVector};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// 每个连杆的标准惯性参数个数
pub const PARAMS_PER_LINK: usize = 10;

/// 标准参数总数
pub const STANDARD_PARAM_COUNT: usize = PARAMS_PER_LINK * DOF;

/// 标准参数向量（定长，控制周期内不分配）
pub type StandardParameters = SVector<f64, STANDARD_PARAM_COUNT>;

/// 标定文件路径
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CalibrationPaths {
    pub permutation_matrix: PathBuf,
    pub pi_b: PathBuf,
    pub pi_fr: PathBuf,
}

impl CalibrationPaths {
    /// 目录下的三个标准文件名
    pub const PERMUTATION_FILE: &'static str = "permutationMatrix.csv";
    pub const PI_B_FILE: &'static str = "pi_b.csv";
    pub const PI_FR_FILE: &'static str = "pi_fr.csv";

    /// `dir/permutationMatrix.csv`、`dir/pi_b.csv`、`dir/pi_fr.csv`
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            permutation_matrix: dir.join(Self::PERMUTATION_FILE),
            pi_b: dir.join(Self::PI_B_FILE),
            pi_fr: dir.join(Self::PI_FR_FILE),
        }
    }

    /// 第一个未设置（空路径）的字段名
    pub fn first_missing(&self) -> Option<&'static str> {
        [
            ("permutation_matrix", &self.permutation_matrix),
            ("pi_b", &self.pi_b),
            ("pi_fr", &self.pi_fr),
        ]
        .into_iter()
        .find(|(_, path)| path.as_os_str().is_empty())
        .map(|(name, _)| name)
    }
}

/// 单关节摩擦参数
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FrictionParams {
    /// 库仑摩擦（N·m）
    pub fc: f64,
    /// 粘滞摩擦（N·m·s/rad）
    pub fv: f64,
    /// 力矩偏置（N·m）
    pub offset: f64,
}

/// 不可变标定集（会话内只读共享）
#[derive(Debug, Clone)]
pub struct CalibrationSet {
    permutation: DMatrix<f64>,
    pi_b: DVector<f64>,
    friction: [FrictionParams; DOF],
    /// `P[:, 0..n_b] · pi_b`，重力矩 `τ = Y_g · effective`
    effective: StandardParameters,
}

impl CalibrationSet {
    /// 由内存数据构造并校验维度
    ///
    /// # 错误
    /// - `CalibrationError::Shape`: `P` 不是 `10N × 10N`、`pi_b` 长度为 0 或超过 `10N`、
    ///   `pi_fr` 长度不是 `2N` / `3N`、或包含非有限值
    pub fn new(
        permutation: DMatrix<f64>,
        pi_b: DVector<f64>,
        pi_fr: DVector<f64>,
    ) -> Result<Self, CalibrationError> {
        if permutation.nrows() != STANDARD_PARAM_COUNT
            || permutation.ncols() != STANDARD_PARAM_COUNT
        {
            return Err(CalibrationError::Shape(format!(
                "permutation matrix must be {n}x{n}, got {}x{}",
                permutation.nrows(),
                permutation.ncols(),
                n = STANDARD_PARAM_COUNT
            )));
        }
        if pi_b.is_empty() || pi_b.len() > STANDARD_PARAM_COUNT {
            return Err(CalibrationError::Shape(format!(
                "pi_b must have 1..={} entries, got {}",
                STANDARD_PARAM_COUNT,
                pi_b.len()
            )));
        }
        let friction = parse_friction(&pi_fr)?;
        if !(permutation.iter().all(|v| v.is_finite()) && pi_b.iter().all(|v| v.is_finite())) {
            return Err(CalibrationError::Shape(
                "calibration contains non-finite values".to_string(),
            ));
        }

        let n_b = pi_b.len();
        let effective =
            StandardParameters::from_column_slice((permutation.columns(0, n_b) * &pi_b).as_slice());

        Ok(Self {
            permutation,
            pi_b,
            friction,
            effective,
        })
    }

    /// 从三个标定文件加载
    pub fn load(paths: &CalibrationPaths) -> Result<Self, CalibrationError> {
        let permutation = load_matrix(&paths.permutation_matrix)?;
        let pi_b = load_vector(&paths.pi_b)?;
        let pi_fr = load_vector(&paths.pi_fr)?;
        let set = Self::new(permutation, pi_b, pi_fr)?;
        info!(
            "Calibration loaded: {} base parameters, permutation {}x{}",
            set.base_parameter_count(),
            set.permutation.nrows(),
            set.permutation.ncols()
        );
        Ok(set)
    }

    /// 由标准参数直接构造（`P = I`，`pi_b` 即标准参数）
    pub fn from_standard_parameters(
        standard: DVector<f64>,
        pi_fr: DVector<f64>,
    ) -> Result<Self, CalibrationError> {
        if standard.len() != STANDARD_PARAM_COUNT {
            return Err(CalibrationError::Shape(format!(
                "standard parameter vector must have {} entries, got {}",
                STANDARD_PARAM_COUNT,
                standard.len()
            )));
        }
        Self::new(
            DMatrix::identity(STANDARD_PARAM_COUNT, STANDARD_PARAM_COUNT),
            standard,
            pi_fr,
        )
    }

    /// 零参数标定（`P = I`，`pi_b = 0`，`pi_fr = 0`），前馈力矩恒为零
    pub fn neutral() -> Self {
        let friction = [FrictionParams::default(); DOF];
        Self {
            permutation: DMatrix::identity(STANDARD_PARAM_COUNT, STANDARD_PARAM_COUNT),
            pi_b: DVector::zeros(STANDARD_PARAM_COUNT),
            friction,
            effective: StandardParameters::zeros(),
        }
    }

    /// 写出为三个 CSV 文件（`pi_b` 每行一个值，`pi_fr` 每行 `[fc, fv, offset]`）
    ///
    /// # 错误
    /// - `CalibrationError::Csv`: 文件创建或写入失败
    pub fn save(&self, paths: &CalibrationPaths) -> Result<(), CalibrationError> {
        let permutation = self
            .permutation
            .row_iter()
            .map(|row| row.iter().copied().collect::<Vec<_>>());
        write_table(&paths.permutation_matrix, permutation)?;
        write_table(&paths.pi_b, self.pi_b.iter().map(|v| vec![*v]))?;
        write_table(
            &paths.pi_fr,
            self.friction.iter().map(|f| vec![f.fc, f.fv, f.offset]),
        )?;
        debug!("Calibration written to {}", paths.permutation_matrix.display());
        Ok(())
    }

    pub fn permutation(&self) -> &DMatrix<f64> {
        &self.permutation
    }

    pub fn pi_b(&self) -> &DVector<f64> {
        &self.pi_b
    }

    /// 基参数个数 `n_b`
    pub fn base_parameter_count(&self) -> usize {
        self.pi_b.len()
    }

    pub fn friction(&self) -> &[FrictionParams; DOF] {
        &self.friction
    }

    /// `P[:, 0..n_b] · pi_b`（长度 `10N`）
    pub fn effective_parameters(&self) -> &StandardParameters {
        &self.effective
    }
}

fn parse_friction(pi_fr: &DVector<f64>) -> Result<[FrictionParams; DOF], CalibrationError> {
    let stride = match pi_fr.len() {
        n if n == 2 * DOF => 2,
        n if n == 3 * DOF => 3,
        n => {
            return Err(CalibrationError::Shape(format!(
                "pi_fr must have {} or {} entries, got {}",
                2 * DOF,
                3 * DOF,
                n
            )));
        },
    };
    if !pi_fr.iter().all(|v| v.is_finite()) {
        return Err(CalibrationError::Shape(
            "pi_fr contains non-finite values".to_string(),
        ));
    }

    Ok(std::array::from_fn(|joint| {
        let base = joint * stride;
        FrictionParams {
            fc: pi_fr[base],
            fv: pi_fr[base + 1],
            offset: if stride == 3 { pi_fr[base + 2] } else { 0.0 },
        }
    }))
}

/// 解析 CSV 数值表
///
/// # 错误
/// - `CalibrationError::Csv`: CSV 读取失败（IO、非 UTF-8）
/// - `CalibrationError::Parse`: 无法解析的数值（带行号）
/// - `CalibrationError::Empty`: 没有任何数值
pub fn parse_table(reader: impl Read, path: &Path) -> Result<Vec<Vec<f64>>, CalibrationError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .comment(Some(b'#'))
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|source| CalibrationError::Csv {
            path: path.to_path_buf(),
            source,
        })?;
        let line = record.position().map_or(0, |p| p.line() as usize);
        let row = record
            .iter()
            .filter(|field| !field.is_empty())
            .map(|field| {
                field.parse::<f64>().map_err(|_| CalibrationError::Parse {
                    path: path.to_path_buf(),
                    line,
                    token: field.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        if !row.is_empty() {
            rows.push(row);
        }
    }
    if rows.is_empty() {
        return Err(CalibrationError::Empty {
            path: path.to_path_buf(),
        });
    }
    Ok(rows)
}

fn read_table(path: &Path) -> Result<Vec<Vec<f64>>, CalibrationError> {
    let file = File::open(path).map_err(|source| CalibrationError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let rows = parse_table(file, path)?;
    debug!("Read calibration table {} ({} rows)", path.display(), rows.len());
    Ok(rows)
}

fn write_table(
    path: &Path,
    rows: impl IntoIterator<Item = Vec<f64>>,
) -> Result<(), CalibrationError> {
    let csv_error = |source: csv::Error| CalibrationError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)
        .map_err(csv_error)?;
    for row in rows {
        writer
            .write_record(row.iter().map(f64::to_string))
            .map_err(csv_error)?;
    }
    writer.flush().map_err(|e| csv_error(e.into()))?;
    Ok(())
}

/// 加载矩阵（各行长度必须一致）
pub fn load_matrix(path: &Path) -> Result<DMatrix<f64>, CalibrationError> {
    let rows = read_table(path)?;
    let ncols = rows[0].len();
    if let Some(bad) = rows.iter().position(|r| r.len() != ncols) {
        return Err(CalibrationError::Shape(format!(
            "{}: row {} has {} columns, expected {}",
            path.display(),
            bad + 1,
            rows[bad].len(),
            ncols
        )));
    }
    Ok(DMatrix::from_row_iterator(
        rows.len(),
        ncols,
        rows.into_iter().flatten(),
    ))
}

/// 加载向量（行向量、列向量或任意排布，按行优先展平）
pub fn load_vector(path: &Path) -> Result<DVector<f64>, CalibrationError> {
    let rows = read_table(path)?;
    Ok(DVector::from_iterator(
        rows.iter().map(Vec::len).sum(),
        rows.into_iter().flatten(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn identity_text() -> String {
        let mut text = String::from("# permutation\n");
        for r in 0..STANDARD_PARAM_COUNT {
            let row: Vec<String> = (0..STANDARD_PARAM_COUNT)
                .map(|c| if r == c { "1".to_string() } else { "0".to_string() })
                .collect();
            text.push_str(&row.join(","));
            text.push('\n');
        }
        text
    }

    #[test]
    fn test_parse_comments_blank_lines_and_padding() {
        let text = "# pi_fr\n1, 2,3 ,4\n\n# comment line\n 5,6,\n";
        let rows = parse_table(text.as_bytes(), Path::new("pi_fr.csv")).unwrap();
        assert_eq!(rows, vec![vec![1.0, 2.0, 3.0, 4.0], vec![5.0, 6.0]]);
    }

    #[test]
    fn test_parse_error_reports_line() {
        let err = parse_table("1,2\n3,abc\n".as_bytes(), Path::new("pi_b.csv")).unwrap_err();
        match err {
            CalibrationError::Parse { line, token, .. } => {
                assert_eq!(line, 2);
                assert_eq!(token, "abc");
            },
            other => panic!("unexpected error: {:?}", other),
        }

        // 非逗号分隔的行整体作为一个字段
        let err = parse_table("1 2\n".as_bytes(), Path::new("pi_b.csv")).unwrap_err();
        assert!(matches!(err, CalibrationError::Parse { line: 1, ref token, .. } if token == "1 2"));
    }

    #[test]
    fn test_empty_file() {
        let err = parse_table("# nothing\n\n".as_bytes(), Path::new("e.csv")).unwrap_err();
        assert!(matches!(err, CalibrationError::Empty { .. }));
    }

    #[test]
    fn test_paths_in_dir() {
        let paths = CalibrationPaths::in_dir("/opt/startouch/params");
        assert_eq!(
            paths.permutation_matrix,
            PathBuf::from("/opt/startouch/params/permutationMatrix.csv")
        );
        assert_eq!(paths.pi_fr, PathBuf::from("/opt/startouch/params/pi_fr.csv"));
        assert_eq!(paths.first_missing(), None);

        let partial = CalibrationPaths {
            pi_b: PathBuf::from("pi_b.csv"),
            ..Default::default()
        };
        assert_eq!(partial.first_missing(), Some("permutation_matrix"));
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let paths = CalibrationPaths::in_dir(dir.path());

        let mut pi_fr = DVector::zeros(3 * DOF);
        pi_fr[3] = 0.25;
        pi_fr[4] = 0.125;
        let standard = DVector::from_fn(STANDARD_PARAM_COUNT, |i, _| i as f64 * 0.01);
        let set = CalibrationSet::from_standard_parameters(standard, pi_fr).unwrap();
        set.save(&paths).unwrap();

        let loaded = CalibrationSet::load(&paths).unwrap();
        assert_eq!(loaded.permutation(), set.permutation());
        assert_eq!(loaded.pi_b(), set.pi_b());
        assert_eq!(loaded.friction(), set.friction());
        assert_eq!(loaded.effective_parameters(), set.effective_parameters());
    }

    #[test]
    fn test_neutral_calibration_has_zero_effect() {
        let set = CalibrationSet::neutral();
        assert_eq!(set.base_parameter_count(), STANDARD_PARAM_COUNT);
        assert!(set.effective_parameters().iter().all(|v| *v == 0.0));
        assert_eq!(set.friction(), &[FrictionParams::default(); DOF]);
    }

    #[test]
    fn test_missing_file() {
        let paths = CalibrationPaths {
            permutation_matrix: PathBuf::from("/nonexistent/permutationMatrix.csv"),
            pi_b: PathBuf::from("/nonexistent/pi_b.csv"),
            pi_fr: PathBuf::from("/nonexistent/pi_fr.csv"),
        };
        let err = CalibrationSet::load(&paths).unwrap_err();
        match err {
            CalibrationError::Io { path, .. } => assert_eq!(path, paths.permutation_matrix),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_ragged_matrix_rejected() {
        let file = write_file("1,2,3\n4,5\n");
        let err = load_matrix(file.path()).unwrap_err();
        assert!(matches!(err, CalibrationError::Shape(ref m) if m.contains("row 2")));
    }

    #[test]
    fn test_load_from_files() {
        let p = write_file(&identity_text());
        let pi_b_text: String = (0..STANDARD_PARAM_COUNT)
            .map(|i| format!("{}\n", i as f64 * 0.1))
            .collect();
        let pi_b = write_file(&pi_b_text);
        let pi_fr = write_file(&"0.1,0.05\n".repeat(DOF));

        let set = CalibrationSet::load(&CalibrationPaths {
            permutation_matrix: p.path().to_path_buf(),
            pi_b: pi_b.path().to_path_buf(),
            pi_fr: pi_fr.path().to_path_buf(),
        })
        .unwrap();

        assert_eq!(set.base_parameter_count(), STANDARD_PARAM_COUNT);
        assert!((set.effective_parameters()[3] - 0.3).abs() < 1e-12);
        assert_eq!(set.friction()[5].fc, 0.1);
        assert_eq!(set.friction()[5].offset, 0.0);
    }

    #[test]
    fn test_shape_checks() {
        let p = DMatrix::identity(STANDARD_PARAM_COUNT, STANDARD_PARAM_COUNT);
        let pi_fr = DVector::zeros(2 * DOF);

        let err = CalibrationSet::new(DMatrix::identity(10, 10), DVector::zeros(5), pi_fr.clone())
            .unwrap_err();
        assert!(matches!(err, CalibrationError::Shape(_)));

        let err = CalibrationSet::new(
            p.clone(),
            DVector::zeros(STANDARD_PARAM_COUNT + 1),
            pi_fr.clone(),
        )
        .unwrap_err();
        assert!(matches!(err, CalibrationError::Shape(_)));

        let err = CalibrationSet::new(p.clone(), DVector::zeros(10), DVector::zeros(7)).unwrap_err();
        assert!(matches!(err, CalibrationError::Shape(ref m) if m.contains("pi_fr")));

        assert!(CalibrationSet::new(p, DVector::zeros(36), pi_fr).is_ok());
    }

    #[test]
    fn test_friction_with_offset() {
        let values: Vec<f64> = (0..3 * DOF).map(|i| i as f64).collect();
        let set = CalibrationSet::from_standard_parameters(
            DVector::zeros(STANDARD_PARAM_COUNT),
            DVector::from_vec(values),
        )
        .unwrap();
        assert_eq!(
            set.friction()[1],
            FrictionParams {
                fc: 3.0,
                fv: 4.0,
                offset: 5.0
            }
        );
    }

    #[test]
    fn test_permutation_selects_base_columns() {
        // 交换第 0 列与第 59 列：基参数 pi_b[0] 作用于标准参数 59（末连杆质量）
        let mut p = DMatrix::identity(STANDARD_PARAM_COUNT, STANDARD_PARAM_COUNT);
        p.swap_columns(0, STANDARD_PARAM_COUNT - 1);
        let set = CalibrationSet::new(p, DVector::from_vec(vec![2.5]), DVector::zeros(2 * DOF))
            .unwrap();
        let effective = set.effective_parameters();
        assert_eq!(effective[STANDARD_PARAM_COUNT - 1], 2.5);
        assert_eq!(effective.iter().filter(|v| **v != 0.0).count(), 1);
    }
}

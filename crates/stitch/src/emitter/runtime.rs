//! Runtime prelude emitted at the top of bundle artifacts
//!
//! The registry lives on `globalThis` so that side chunks loaded later can
//! register their units into the registry the entry artifact created.
//! Chunk paths are relative to the entry artifact, whose location the
//! prelude captures while it runs.

/// Module registry created by the entry artifact
pub(crate) const PRELUDE: &str = r#"var __stitch = (function (scope) {
  if (scope.__stitch) return scope.__stitch;
  var factories = {};
  var cache = {};
  var loading = {};
  var hasOwn = Object.prototype.hasOwnProperty;
  var base = typeof document === "object" && document && document.currentScript && document.currentScript.src
    ? document.currentScript.src
    : null;
  function define(id, factory) {
    if (!hasOwn.call(factories, id)) factories[id] = factory;
  }
  function requireModule(id) {
    var cached = cache[id];
    if (cached) return cached.exports;
    if (!hasOwn.call(factories, id)) throw new Error("stitch: module " + id + " is not loaded");
    var module = { exports: {} };
    cache[id] = module;
    factories[id].call(module.exports, module, module.exports, requireModule);
    return module.exports;
  }
  function defineGetters(exports, getters) {
    for (var name in getters) {
      if (hasOwn.call(getters, name) && !hasOwn.call(exports, name)) {
        Object.defineProperty(exports, name, { enumerable: true, configurable: true, get: getters[name] });
      }
    }
  }
  function markEsm(exports) {
    if (!hasOwn.call(exports, "__esModule")) Object.defineProperty(exports, "__esModule", { value: true });
  }
  function interopDefault(source) {
    return source && source.__esModule ? source["default"] : source;
  }
  function exportStar(exports, source) {
    Object.keys(source).forEach(function (name) {
      if (name !== "default" && name !== "__esModule" && !hasOwn.call(exports, name)) {
        Object.defineProperty(exports, name, { enumerable: true, configurable: true, get: function () { return source[name]; } });
      }
    });
  }
  function reexport(exports, source, names) {
    var getters = {};
    Object.keys(names).forEach(function (name) {
      var imported = names[name];
      getters[name] = imported === "default"
        ? function () { return interopDefault(source); }
        : function () { return source[imported]; };
    });
    defineGetters(exports, getters);
  }
  function load(file) {
    if (!loading[file]) {
      loading[file] = typeof require === "function" && typeof module === "object" && module
        ? Promise.resolve().then(function () { require("./" + file); })
        : import(base ? new URL(file, base).href : "./" + file);
    }
    return loading[file];
  }
  scope.__stitch = {
    define: define,
    require: requireModule,
    exportGetters: defineGetters,
    markEsm: markEsm,
    interopDefault: interopDefault,
    exportStar: exportStar,
    reexport: reexport,
    load: load
  };
  return scope.__stitch;
})(typeof globalThis !== "undefined" ? globalThis : this);
"#;

/// Helper bindings every artifact declares before its units
pub(crate) const BINDINGS: &str = "var __stitch_define = __stitch.define, \
__stitch_export = __stitch.exportGetters, __stitch_esm = __stitch.markEsm, \
__stitch_default = __stitch.interopDefault, __stitch_export_star = __stitch.exportStar, \
__stitch_reexport = __stitch.reexport, __stitch_load = __stitch.load;\n";

/// First line of a side chunk, which reuses the entry's registry
pub(crate) const CHUNK_HEADER: &str = "var __stitch = globalThis.__stitch;\n";

/// Name of the exports parameter of a unit
///
/// Modules with import or export syntax may declare their own `module` and
/// `exports`, so their units take reserved parameter names instead.
pub(crate) const fn exports_param(esm: bool) -> &'static str {
    if esm { "__stitch_exports" } else { "exports" }
}

/// Opening line of a module unit
pub(crate) fn unit_header(id: usize, esm: bool) -> String {
    let module = if esm { "__stitch_module" } else { "module" };
    format!(
        "__stitch_define({id}, function ({module}, {}, __stitch_require) {{",
        exports_param(esm)
    )
}

/// Closing line of a module unit
pub(crate) const UNIT_FOOTER: &str = "});";

/// Last lines of the entry artifact: run the entry module
pub(crate) fn entry_epilogue(entry_id: usize) -> String {
    format!(
        "var __stitch_entry = __stitch.require({entry_id});\n\
         if (typeof module === \"object\" && module && module.exports) module.exports = __stitch_entry;\n"
    )
}

/// Trailing comment pointing at the artifact's source map
pub(crate) fn source_map_comment(map_name: &str) -> String {
    format!("//# sourceMappingURL={map_name}\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prelude_lines_are_terminated() {
        assert!(PRELUDE.ends_with('\n'));
        assert!(BINDINGS.ends_with('\n'));
        assert_eq!(BINDINGS.lines().count(), 1);
    }

    #[test]
    fn test_unit_header_is_one_line() {
        let header = unit_header(7, false);
        assert_eq!(
            header,
            "__stitch_define(7, function (module, exports, __stitch_require) {"
        );
        assert!(!header.contains('\n'));
    }

    #[test]
    fn test_module_units_use_reserved_parameters() {
        assert_eq!(
            unit_header(3, true),
            "__stitch_define(3, function (__stitch_module, __stitch_exports, __stitch_require) {"
        );
        assert_eq!(exports_param(true), "__stitch_exports");
    }
}
